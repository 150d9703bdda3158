use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FftFixedIn, Resampler};
use tracing::{error, info, warn};

use crate::audio::pcm::AudioFrame;
use crate::audio::playback::PlaybackSink;
use crate::error::SessionError;

/// Input block size fed to the FFT resampler.
const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Streaming rate converter between the fixed service rate and the output
/// device rate. Pass-through when the rates already match.
///
/// The FFT resampler wants fixed input blocks, so samples are staged in a
/// pending buffer and the trailing partial block waits for the next push.
pub struct RateAdapter {
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl RateAdapter {
    pub fn new(source_rate: u32, device_rate: u32) -> Result<Self, SessionError> {
        let resampler = if source_rate == device_rate {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    source_rate as usize,
                    device_rate as usize,
                    RESAMPLE_CHUNK,
                    RESAMPLE_SUB_CHUNKS,
                    1,
                )
                .map_err(|e| SessionError::Acquisition(format!("resampler: {}", e)))?,
            )
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    /// Feed samples, returning whatever converted output is ready.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let resampler = match &mut self.resampler {
            Some(r) => r,
            None => return samples.to_vec(),
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        while self.pending.len() >= RESAMPLE_CHUNK {
            let block: Vec<f32> = self.pending.drain(..RESAMPLE_CHUNK).collect();
            match resampler.process(&[block], None) {
                Ok(mut frames) => out.append(&mut frames.remove(0)),
                Err(e) => warn!("resample failed, dropping block: {}", e),
            }
        }
        out
    }

    /// Discard staged samples. Used on playback flush so an interrupted
    /// tail never bleeds into the next turn.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// cpal-backed speaker output.
///
/// Decoded frames land in a shared queue the device callback drains; silence
/// is filled when the queue runs dry, so the stream itself never stops
/// between chunks.
pub struct SpeakerSink {
    stream: Option<cpal::Stream>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    adapter: RateAdapter,
}

impl SpeakerSink {
    /// `source_rate` is the fixed rate of inbound synthesized speech.
    pub fn open(source_rate: u32) -> Result<Self, SessionError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SessionError::Acquisition("no output device available".into()))?;

        let config = device
            .default_output_config()
            .map_err(|e| SessionError::Acquisition(format!("output config: {}", e)))?;
        let device_rate = config.sample_rate().0;
        let device_channels = config.channels();
        info!(
            "Audio Output Device: {} ({} Hz, {} ch)",
            device.name().unwrap_or_default(),
            device_rate,
            device_channels
        );

        let adapter = RateAdapter::new(source_rate, device_rate)?;

        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let cb_queue = queue.clone();
        let channels = device_channels as usize;

        let err_fn = |err| error!("output stream error: {}", err);
        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut q = match cb_queue.lock() {
                        Ok(q) => q,
                        Err(_) => return,
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = q.pop_front().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| SessionError::Acquisition(format!("output stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| SessionError::Acquisition(format!("output start: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            queue,
            adapter,
        })
    }
}

impl PlaybackSink for SpeakerSink {
    fn push(&mut self, frame: &AudioFrame) {
        if self.stream.is_none() {
            return;
        }
        let converted = self.adapter.push(&frame.samples);
        match self.queue.lock() {
            Ok(mut q) => q.extend(converted),
            Err(_) => warn!("output queue poisoned; dropping frame"),
        }
    }

    fn clear(&mut self) {
        self.adapter.reset();
        if let Ok(mut q) = self.queue.lock() {
            q.clear();
        }
    }

    fn close(&mut self) {
        self.adapter.reset();
        if let Ok(mut q) = self.queue.lock() {
            q.clear();
        }
        self.stream.take();
    }
}

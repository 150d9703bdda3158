use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::audio::pcm::{self, AudioFrame, EncodedChunk};
use crate::error::SessionError;

/// Samples pulled per block at the device rate. Block-driven, not
/// wall-clock-driven: chunk cadence follows the audio subsystem.
pub const CAPTURE_BLOCK: usize = 4096;

/// Ring capacity between the device callback and the pump (~2s at 48 kHz).
const RING_CAPACITY: usize = 96_000;

/// Interface the call driver uses to control the microphone.
pub trait CaptureControl {
    /// Halt block delivery. Idempotent.
    fn stop(&mut self);
    /// Silence emitted samples without changing block cadence.
    fn set_muted(&mut self, muted: bool);
}

/// Hardware-free half of the capture pipeline: pops fixed-size blocks off
/// the ring, downsamples to the transport rate, encodes, and emits chunks.
pub struct CapturePump<C> {
    consumer: C,
    source_rate: u32,
    target_rate: u32,
    muted: Arc<AtomicBool>,
    block: Vec<f32>,
}

impl<C> CapturePump<C>
where
    C: Consumer<Item = f32>,
{
    pub fn new(consumer: C, source_rate: u32, target_rate: u32, muted: Arc<AtomicBool>) -> Self {
        Self {
            consumer,
            source_rate,
            target_rate,
            muted,
            block: vec![0.0; CAPTURE_BLOCK],
        }
    }

    /// Process every full block currently buffered. Returns the number of
    /// chunks emitted. Mute zeroes the content but never skips a block.
    pub fn drain(&mut self, mut on_chunk: impl FnMut(EncodedChunk)) -> usize {
        let mut emitted = 0;
        while self.consumer.occupied_len() >= CAPTURE_BLOCK {
            let _ = self.consumer.pop_slice(&mut self.block);
            if self.muted.load(Ordering::Relaxed) {
                self.block.fill(0.0);
            }

            let frame = AudioFrame::mono(self.block.clone(), self.source_rate);
            let down = pcm::downsample(&frame, self.source_rate, self.target_rate);
            let bytes = pcm::encode_pcm16(&down);
            on_chunk(EncodedChunk::pcm(self.target_rate, pcm::encode_base64(&bytes)));
            emitted += 1;
        }
        emitted
    }
}

impl CapturePump<ringbuf::HeapCons<f32>> {
    /// Build a pump plus the producer side of its ring. Lets the block
    /// source be fed directly instead of by a device callback.
    pub fn with_ring(
        capacity: usize,
        source_rate: u32,
        target_rate: u32,
    ) -> (ringbuf::HeapProd<f32>, Self, Arc<AtomicBool>) {
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();
        let muted = Arc::new(AtomicBool::new(false));
        let pump = Self::new(consumer, source_rate, target_rate, muted.clone());
        (producer, pump, muted)
    }
}

/// Owns the cpal input stream and the pump task for one capture run.
///
/// `start` acquires the device or fails with a single `Acquisition` error;
/// `stop` then `start` again yields a fresh block source with nothing
/// leaked from the previous run.
pub struct CaptureController {
    stream: Option<cpal::Stream>,
    pump_cancel: Option<CancellationToken>,
    muted: Arc<AtomicBool>,
    pub sample_rate: u32,
}

impl CaptureController {
    pub fn start(
        target_rate: u32,
        chunk_tx: mpsc::Sender<EncodedChunk>,
    ) -> Result<Self, SessionError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SessionError::Acquisition("no input device available".into()))?;
        info!("Audio Input Device: {}", device.name().unwrap_or_default());

        // Prefer the transport rate directly, then rates the downsampler
        // handles well.
        let target_rates = [target_rate, 48_000, 44_100, 32_000];
        let mut selected = None;
        for &rate in &target_rates {
            let ranges = device
                .supported_input_configs()
                .map_err(|e| SessionError::Acquisition(format!("input configs: {}", e)))?;
            for range in ranges {
                if range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate {
                    selected = Some(range.with_sample_rate(cpal::SampleRate(rate)));
                    break;
                }
            }
            if selected.is_some() {
                break;
            }
        }
        let config = match selected {
            Some(c) => c,
            None => device
                .default_input_config()
                .map_err(|e| SessionError::Acquisition(format!("input config: {}", e)))?,
        };
        let source_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        info!(
            "Audio Config Selected: Rate={}Hz, Channels={}",
            source_rate, channels
        );

        let rb = HeapRb::<f32>::new(RING_CAPACITY);
        let (mut producer, consumer) = rb.split();

        let err_fn = |err| error!("input stream error: {}", err);
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    write_mono(data, channels, &mut producer);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let as_f32: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    write_mono(&as_f32, channels, &mut producer);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(SessionError::Acquisition(format!(
                    "unsupported sample format: {:?}",
                    other
                )))
            }
        }
        .map_err(|e| SessionError::Acquisition(format!("input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SessionError::Acquisition(format!("input start: {}", e)))?;

        let muted = Arc::new(AtomicBool::new(false));
        let mut pump = CapturePump::new(consumer, source_rate, target_rate, muted.clone());
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut cadence = tokio::time::interval(Duration::from_millis(20));
            cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    _ = cadence.tick() => {
                        pump.drain(|chunk| {
                            // Real-time stream: if the transport side is
                            // backed up, stale audio has no value.
                            if chunk_tx.try_send(chunk).is_err() {
                                debug!("capture chunk dropped (channel full or closed)");
                            }
                        });
                    }
                }
            }
            debug!("capture pump stopped");
        });

        Ok(Self {
            stream: Some(stream),
            pump_cancel: Some(cancel),
            muted,
            sample_rate: source_rate,
        })
    }
}

impl CaptureControl for CaptureController {
    fn stop(&mut self) {
        if let Some(cancel) = self.pump_cancel.take() {
            cancel.cancel();
        }
        if self.stream.take().is_some() {
            info!("capture stopped");
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
        info!(muted, "capture mute toggled");
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_mono<P>(input: &[f32], channels: usize, producer: &mut P)
where
    P: Producer<Item = f32>,
{
    if channels <= 1 {
        // A full ring drops input; the pump is expected to keep up.
        let _ = producer.push_slice(input);
        return;
    }
    for frame in input.chunks(channels) {
        let sum: f32 = frame.iter().sum();
        let _ = producer.try_push(sum / channels as f32);
    }
}

//! Fixed-interval frame sampling for the video side of a call.
//!
//! Entirely decoupled from the audio cadence: a timer pulls one JPEG frame
//! per period from a `FrameSource` and forwards it over the transport.
//! Grab failures skip that tick rather than ending the call.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::pcm::{self, EncodedChunk};
use crate::error::SessionError;
use crate::session::OutboundLink;

pub trait FrameSource: Send + Sync {
    fn grab_jpeg(&self) -> Result<Vec<u8>, SessionError>;
}

/// Runs while the video toggle is on. `stop` is idempotent.
pub struct VideoSampler {
    cancel: CancellationToken,
}

impl VideoSampler {
    pub fn start<L>(link: L, source: Arc<dyn FrameSource>, period: Duration) -> Self
    where
        L: OutboundLink + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut cadence = tokio::time::interval(period);
            cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("video sampler started ({:?} period)", period);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = cadence.tick() => {
                        match source.grab_jpeg() {
                            Ok(bytes) => {
                                link.send_video_frame(EncodedChunk::jpeg(
                                    pcm::encode_base64(&bytes),
                                ));
                            }
                            Err(e) => debug!("frame grab skipped: {}", e),
                        }
                    }
                }
            }
            info!("video sampler stopped");
        });

        Self { cancel }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for VideoSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// xcap-backed frame source: grabs the primary display and JPEG-encodes it.
pub struct ScreenFrameSource {
    quality: u8,
}

impl ScreenFrameSource {
    pub fn new() -> Result<Self, SessionError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| SessionError::Acquisition(format!("monitor enumeration: {}", e)))?;
        if monitors.is_empty() {
            return Err(SessionError::Acquisition("no capturable display".into()));
        }
        Ok(Self { quality: 70 })
    }
}

impl FrameSource for ScreenFrameSource {
    fn grab_jpeg(&self) -> Result<Vec<u8>, SessionError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| SessionError::Acquisition(format!("monitor enumeration: {}", e)))?;
        let monitor = monitors
            .first()
            .ok_or_else(|| SessionError::Acquisition("no capturable display".into()))?;
        let image = monitor
            .capture_image()
            .map_err(|e| SessionError::Acquisition(format!("frame capture: {}", e)))?;

        let (width, height) = (image.width(), image.height());
        let rgba = image.into_raw();
        // JPEG has no alpha channel.
        let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
        for px in rgba.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }

        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode(&rgb, width, height, image::ColorType::Rgb8)
            .map_err(|e| SessionError::Acquisition(format!("jpeg encode: {}", e)))?;
        Ok(out)
    }
}

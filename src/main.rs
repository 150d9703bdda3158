use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use jambuster::audio::capture::CaptureController;
use jambuster::audio::output::SpeakerSink;
use jambuster::audio::playback::{PlaybackQueue, SystemClock};
use jambuster::convo::{CallDriver, ERROR_HOLD};
use jambuster::history::MemoryHistory;
use jambuster::session::{LiveTransport, OutboundLink};
use jambuster::video::ScreenFrameSource;
use jambuster::SessionConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let session_id = Uuid::new_v4();
    info!(%session_id, "Jam Buster voice session booting...");

    let config = SessionConfig::from_env()?;

    // Only awaitable step from the caller's perspective: everything after
    // this is callback-driven.
    let (mut transport, events) = LiveTransport::connect(&config).await?;
    let link = transport.link();

    // Microphone -> encoded chunks -> transport.
    let (chunk_tx, mut chunk_rx) = mpsc::channel(64);
    let capture = match CaptureController::start(config.input_rate, chunk_tx) {
        Ok(capture) => capture,
        Err(e) => {
            // Mic failed after the socket opened; tear the session down
            // before surfacing the acquisition error.
            transport.disconnect().await;
            return Err(e.into());
        }
    };
    let forward_link = link.clone();
    let forward = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            forward_link.send_audio(chunk);
        }
    });

    let sink = match SpeakerSink::open(config.output_rate) {
        Ok(sink) => sink,
        Err(e) => {
            transport.disconnect().await;
            return Err(e.into());
        }
    };
    let playback = PlaybackQueue::new(sink, SystemClock::new(), config.output_rate);

    let mut driver = CallDriver::new(
        link.clone(),
        events,
        playback,
        Box::new(capture),
        Box::new(MemoryHistory::new()),
        config.dedup_window,
        config.video_interval,
        ERROR_HOLD,
    );

    if std::env::var("JAMBUSTER_VIDEO").is_ok() {
        match ScreenFrameSource::new() {
            Ok(source) => driver.start_video(Arc::new(source)),
            Err(e) => warn!("video disabled: {}", e),
        }
    }

    // Ctrl+C hangs up; the close flows back as a Closed event.
    let hangup = link.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("hangup requested");
            hangup.close();
        }
    });

    info!("Call active. Press Ctrl+C to hang up.");
    let error = driver.run_until_ended().await;
    forward.abort();
    transport.disconnect().await;

    if let Some(e) = error {
        anyhow::bail!("call ended with transport error: {}", e);
    }
    info!("call ended");
    Ok(())
}

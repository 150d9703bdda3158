use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::capture::CaptureControl;
use crate::audio::playback::{AudioClock, PlaybackQueue, PlaybackSink};
use crate::convo::state::{Action, ConnectionStatus, ConvoState};
use crate::convo::transcript::TranscriptEntry;
use crate::history::HistoryStore;
use crate::session::{OutboundLink, Speaker, TransportEvent};
use crate::video::{FrameSource, VideoSampler};

/// How long the visible error state is held before returning to idle.
pub const ERROR_HOLD: Duration = Duration::from_secs(3);

/// Owns one call end to end: transport link, capture, playback, the
/// optional video sampler, and the conversation state machine.
///
/// One driver per call; a new call must not be constructed until the
/// previous driver's run has returned (its teardown is then complete).
pub struct CallDriver<L, S, C>
where
    L: OutboundLink + Clone + Send + 'static,
    S: PlaybackSink,
    C: AudioClock,
{
    state: ConvoState,
    link: L,
    events: mpsc::Receiver<TransportEvent>,
    playback: PlaybackQueue<S, C>,
    capture: Box<dyn CaptureControl>,
    video: Option<VideoSampler>,
    history: Box<dyn HistoryStore>,
    video_interval: Duration,
    error_hold: Duration,
    released: bool,
}

impl<L, S, C> CallDriver<L, S, C>
where
    L: OutboundLink + Clone + Send + 'static,
    S: PlaybackSink,
    C: AudioClock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: L,
        events: mpsc::Receiver<TransportEvent>,
        playback: PlaybackQueue<S, C>,
        capture: Box<dyn CaptureControl>,
        history: Box<dyn HistoryStore>,
        dedup_window: Duration,
        video_interval: Duration,
        error_hold: Duration,
    ) -> Self {
        let mut state = ConvoState::new(dedup_window);
        state.begin_connecting();
        Self {
            state,
            link,
            events,
            playback,
            capture,
            video: None,
            history,
            video_interval,
            error_hold,
            released: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn live_text(&self, sender: Speaker) -> &str {
        self.state.live_text(sender)
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.state.transcript()
    }

    pub fn playback(&self) -> &PlaybackQueue<S, C> {
        &self.playback
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.capture.set_muted(muted);
    }

    /// Video on/off toggle, independent of the audio cadence.
    pub fn start_video(&mut self, source: Arc<dyn FrameSource>) {
        if self.video.is_none() {
            self.video = Some(VideoSampler::start(
                self.link.clone(),
                source,
                self.video_interval,
            ));
        }
    }

    pub fn stop_video(&mut self) {
        if let Some(mut sampler) = self.video.take() {
            sampler.stop();
        }
    }

    /// User hangs up. The transport close flows back as a `Closed` event,
    /// which ends the run loop and performs the release checklist there.
    pub fn end_call(&mut self) {
        if !self.released {
            self.link.close();
        }
    }

    /// Consume events until the transport closes, executing the actions the
    /// state machine emits. Returns the close error, if any.
    pub async fn run_until_ended(&mut self) -> Option<String> {
        self.state.mark_connected();

        let mut close_error = None;
        'events: while let Some(event) = self.events.recv().await {
            let actions = self.state.apply(event, Instant::now());
            let mut ended = false;
            for action in actions {
                match action {
                    Action::Play(chunk) => {
                        // One bad frame never kills the playback queue.
                        if let Err(e) = self.playback.enqueue(&chunk) {
                            warn!("skipping malformed audio chunk: {}", e);
                        }
                    }
                    Action::InterruptPlayback => self.playback.interrupt(),
                    Action::SendToolAck { id, name, response } => {
                        // Log and carry on: failing the whole call is worse
                        // than an unacknowledged tool.
                        if let Err(e) = self.link.send_tool_ack(&id, &name, response) {
                            warn!("tool acknowledgment failed: {}", e);
                        }
                    }
                    Action::Ended { error } => {
                        close_error = error;
                        ended = true;
                    }
                }
            }
            if ended {
                break 'events;
            }
        }

        self.finish(close_error.clone()).await;
        close_error
    }

    async fn finish(&mut self, error: Option<String>) {
        self.release();
        let transcript = self.state.take_transcript();
        info!(entries = transcript.len(), "persisting call transcript");
        self.history.append_session(Utc::now(), transcript);

        if error.is_some() {
            // Error state is transient and display-only; no retry.
            self.state.mark_error();
            tokio::time::sleep(self.error_hold).await;
        }
        self.state.mark_idle();
    }

    /// The release checklist: capture, camera loop, playback, transport.
    /// Explicit end-of-call and a remote close can both land here; it runs
    /// its side effects once.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.capture.stop();
        self.stop_video();
        self.playback.shutdown();
        self.link.close();
    }
}

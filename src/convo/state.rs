use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::audio::pcm::EncodedChunk;
use crate::convo::transcript::TranscriptEntry;
use crate::session::transport::SHOW_MAP_TOOL;
use crate::session::{Speaker, TransportEvent};

/// UI-visible connection status. Exactly one value live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Error,
}

/// Side effects the driver must execute after applying an event.
/// Mirrors the reduce/effect split: the state machine never touches the
/// transport or the speakers itself.
#[derive(Debug, PartialEq)]
pub enum Action {
    Play(EncodedChunk),
    InterruptPlayback,
    SendToolAck {
        id: String,
        name: String,
        response: Value,
    },
    Ended {
        error: Option<String>,
    },
}

/// Per-session conversation state: fragment accumulation, utterance
/// finalization, duplicate suppression, and the transcript list.
///
/// All state lives on the instance so independent sessions can coexist
/// (and be driven directly in tests).
pub struct ConvoState {
    status: ConnectionStatus,
    user_buf: String,
    assistant_buf: String,
    transcript: Vec<TranscriptEntry>,
    /// Most recent finalized user utterance, for duplicate suppression of
    /// repeated "turn complete" signals.
    last_user_final: Option<(String, Instant)>,
    dedup_window: Duration,
}

impl ConvoState {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            status: ConnectionStatus::Idle,
            user_buf: String::new(),
            assistant_buf: String::new(),
            transcript: Vec::new(),
            last_user_final: None,
            dedup_window,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// `idle -> connecting`: wipe everything from the previous session.
    pub fn begin_connecting(&mut self) {
        self.user_buf.clear();
        self.assistant_buf.clear();
        self.transcript.clear();
        self.last_user_final = None;
        self.set_status(ConnectionStatus::Connecting);
    }

    pub fn mark_connected(&mut self) {
        self.set_status(ConnectionStatus::Connected);
    }

    pub fn mark_idle(&mut self) {
        self.set_status(ConnectionStatus::Idle);
    }

    pub fn mark_error(&mut self) {
        self.set_status(ConnectionStatus::Error);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!(from = ?self.status, to = ?status, "conversation status");
            self.status = status;
        }
    }

    /// Incremental "live" view of the fragment buffer for one speaker.
    pub fn live_text(&self, sender: Speaker) -> &str {
        match sender {
            Speaker::User => &self.user_buf,
            Speaker::Assistant => &self.assistant_buf,
        }
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn take_transcript(&mut self) -> Vec<TranscriptEntry> {
        std::mem::take(&mut self.transcript)
    }

    /// Reduce one transport event into state plus follow-up actions.
    /// Fragments for a given sender must arrive in order; the buffers
    /// concatenate blindly.
    pub fn apply(&mut self, event: TransportEvent, now: Instant) -> Vec<Action> {
        match event {
            TransportEvent::Transcript {
                sender,
                text,
                is_final,
            } => {
                self.buffer_mut(sender).push_str(&text);
                if is_final {
                    self.finalize(sender, now);
                }
                Vec::new()
            }
            TransportEvent::Audio(chunk) => vec![Action::Play(chunk)],
            TransportEvent::Interrupted => vec![Action::InterruptPlayback],
            TransportEvent::ToolCall { id, name, args } => self.handle_tool_call(id, name, args),
            TransportEvent::Closed { error } => {
                if error.is_some() {
                    self.set_status(ConnectionStatus::Error);
                } else {
                    self.set_status(ConnectionStatus::Idle);
                }
                vec![Action::Ended { error }]
            }
        }
    }

    fn buffer_mut(&mut self, sender: Speaker) -> &mut String {
        match sender {
            Speaker::User => &mut self.user_buf,
            Speaker::Assistant => &mut self.assistant_buf,
        }
    }

    /// Final marker: append an utterance if the buffer holds anything,
    /// then clear it either way. An empty final is just a flush.
    fn finalize(&mut self, sender: Speaker, now: Instant) {
        let text = self.buffer_mut(sender).trim().to_string();
        self.buffer_mut(sender).clear();
        if text.is_empty() {
            return;
        }

        if sender == Speaker::User {
            // The service can emit the turn-complete signal twice; drop an
            // identical user utterance landing inside the window.
            if let Some((last, at)) = &self.last_user_final {
                if *last == text && now.duration_since(*at) < self.dedup_window {
                    debug!("suppressed duplicate user utterance");
                    return;
                }
            }
            self.last_user_final = Some((text.clone(), now));
        }

        self.transcript
            .push(TranscriptEntry::utterance(sender, text));
    }

    fn handle_tool_call(&mut self, id: String, name: String, args: Value) -> Vec<Action> {
        let response = if name == SHOW_MAP_TOOL {
            let origin = args
                .get("origin")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let destination = args
                .get("destination")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            info!(%origin, %destination, "map intent");
            self.transcript.push(TranscriptEntry::MapIntent {
                origin,
                destination,
            });
            json!({ "ok": true })
        } else {
            // Still ack: an unanswered invocation stalls the remote.
            warn!(%name, "unknown tool invocation");
            json!({ "error": format!("unknown tool: {}", name) })
        };

        vec![Action::SendToolAck { id, name, response }]
    }
}

use serde::{Deserialize, Serialize};

use crate::session::Speaker;

/// One finalized entry in the conversation history.
///
/// Map intents come from navigation tool calls and are never merged with
/// spoken text; both kinds are immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TranscriptEntry {
    Utterance { sender: Speaker, text: String },
    MapIntent { origin: String, destination: String },
}

impl TranscriptEntry {
    pub fn utterance(sender: Speaker, text: impl Into<String>) -> Self {
        Self::Utterance {
            sender,
            text: text.into(),
        }
    }
}

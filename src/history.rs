use chrono::{DateTime, Utc};

use crate::convo::transcript::TranscriptEntry;

/// External collaborator: receives the finalized transcript when a call
/// ends. Persistence format is its problem, not ours.
pub trait HistoryStore {
    fn append_session(&mut self, ended_at: DateTime<Utc>, entries: Vec<TranscriptEntry>);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub ended_at: DateTime<Utc>,
    pub entries: Vec<TranscriptEntry>,
}

/// In-memory store used by the binary and the tests.
#[derive(Default)]
pub struct MemoryHistory {
    pub sessions: Vec<SessionRecord>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistory {
    fn append_session(&mut self, ended_at: DateTime<Utc>, entries: Vec<TranscriptEntry>) {
        self.sessions.push(SessionRecord { ended_at, entries });
    }
}

/// Shared handle form, so a caller can keep reading history after handing
/// the store to a call driver.
impl<H: HistoryStore> HistoryStore for std::sync::Arc<std::sync::Mutex<H>> {
    fn append_session(&mut self, ended_at: DateTime<Utc>, entries: Vec<TranscriptEntry>) {
        if let Ok(mut inner) = self.lock() {
            inner.append_session(ended_at, entries);
        }
    }
}

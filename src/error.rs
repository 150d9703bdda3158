use thiserror::Error;

/// Failures that can end (or prevent) a live call.
///
/// Only `Handshake` and `Transport` ever escalate to the visible error
/// state; everything else is contained where it happens.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone/camera could not be opened. Fatal to starting a session.
    #[error("device acquisition failed: {0}")]
    Acquisition(String),

    /// The transport never reached the open state.
    #[error("live session handshake failed: {0}")]
    Handshake(String),

    /// Connection failure after the session was open.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed inbound chunk. The playback queue skips these.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The required tool-result acknowledgment could not be sent.
    /// Logged and the conversation continues.
    #[error("tool acknowledgment failed: {0}")]
    ToolAck(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected chunk mime type: {0}")]
    MimeType(String),
}

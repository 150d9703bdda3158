pub mod call;
pub mod state;
pub mod transcript;

pub use call::{CallDriver, ERROR_HOLD};
pub use state::{Action, ConnectionStatus, ConvoState};
pub use transcript::TranscriptEntry;

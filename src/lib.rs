pub mod audio;
pub mod config;
pub mod convo;
pub mod error;
pub mod history;
pub mod session;
pub mod video;

pub use config::SessionConfig;
pub use convo::CallDriver;
pub use error::SessionError;
pub use session::LiveTransport;

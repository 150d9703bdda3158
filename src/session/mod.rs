pub mod transport;
pub mod wire;

pub use transport::{
    LiveLink, LivePhase, LiveTransport, OutboundLink, Speaker, TransportEvent,
};

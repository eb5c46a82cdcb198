//! Packet source implementations

pub mod replay;
pub mod stream;

pub use replay::ReplaySource;
pub use stream::{DEFAULT_MAX_PAYLOAD, DEFAULT_RECEIVE_BUFFER, StreamSource};

//! P2P networking module - peer scoring, wire framing and transports

mod peer;
mod protocol;
mod tcp;
mod transport;

pub use peer::*;
pub use protocol::*;
pub use tcp::{Inbound, TcpTransport};
pub use transport::{Transport, TransportError};

//! Qontrol link core
//!
//! Establishes and supervises a single stream connection to one remote peer.
//! [`ConnectionManager`] owns the link state machine and two kinds of worker
//! task: a connect worker that performs one dial, and a stream worker that
//! keeps a read loop alive on the resulting session and reports link loss.
//! Transports plug in through the [`Transport`] and [`Session`] traits.

pub mod connection;
pub mod error;
pub mod logging;
pub mod peer;
pub mod transport;

pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStats, ConnectionStatus,
};
pub use error::{ErrorCategory, LinkError, LinkResult};
pub use peer::{PeerAddress, ServiceId};
pub use transport::{LinkConfig, LinkConfigBuilder, MemoryTransport, Session, TcpTransport, Transport};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

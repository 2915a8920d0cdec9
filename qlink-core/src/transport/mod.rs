// Transport abstraction: dial a peer, then read/write/close a byte-stream session

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::LinkResult;
use crate::peer::{PeerAddress, ServiceId};

pub use self::config::{LinkConfig, LinkConfigBuilder};
pub use self::memory::{DialGate, MemoryTransport, RemoteEnd};
pub use self::stream::StreamSession;
pub use self::tcp::TcpTransport;

mod config;
pub mod memory;
mod stream;
pub mod tcp;

/// Opens sessions to peers.
///
/// Dropping the future returned by [`Transport::dial`] must abandon the
/// attempt and release any half-open handle; the connect worker relies on
/// this for cancellation.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn dial(&self, peer: &PeerAddress, service: ServiceId) -> LinkResult<Arc<dyn Session>>;

    /// Halt any discovery in progress. Discovery and connection setup are
    /// mutually exclusive on some radios.
    async fn cancel_discovery(&self) -> LinkResult<()> {
        Ok(())
    }
}

/// An open bidirectional byte stream bound to one peer.
///
/// `close` must be safe to call while a `read` is pending on another task,
/// and must make that read return promptly with an error.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    fn peer(&self) -> &PeerAddress;

    /// Read into `buf`. `Ok(0)` means the peer closed the stream.
    async fn read(&self, buf: &mut [u8]) -> LinkResult<usize>;

    async fn write(&self, data: &[u8]) -> LinkResult<usize>;

    /// Idempotent
    async fn close(&self) -> LinkResult<()>;

    fn is_closed(&self) -> bool;
}

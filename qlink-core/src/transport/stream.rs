// Session over any pair of async read/write halves

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use super::Session;
use crate::error::{LinkError, LinkResult};
use crate::peer::PeerAddress;

#[derive(Debug, Clone, PartialEq)]
enum SessionStatus {
    Open,
    Closed,
    Aborted(String),
}

/// Session backed by split stream halves.
///
/// Reads and writes each hold their own half, so the two directions fail
/// independently. Close and abort are signalled through a watch channel that
/// every pending read and write races against.
pub struct StreamSession<R, W> {
    peer: PeerAddress,
    reader: Mutex<R>,
    writer: Mutex<W>,
    status: watch::Sender<SessionStatus>,
}

impl<R, W> StreamSession<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(peer: PeerAddress, reader: R, writer: W) -> Self {
        let (status, _) = watch::channel(SessionStatus::Open);
        Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            status,
        }
    }

    /// Tear the session down as if the link broke. Pending and future reads
    /// fail with a read error rather than a clean close.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status.send_if_modified(|status| {
            if *status == SessionStatus::Open {
                *status = SessionStatus::Aborted(reason);
                true
            } else {
                false
            }
        });
    }

    fn shut_error(&self) -> LinkError {
        self.read_error()
            .unwrap_or_else(|| LinkError::stream_closed("session closed"))
    }

    fn read_error(&self) -> Option<LinkError> {
        match &*self.status.borrow() {
            SessionStatus::Open => None,
            SessionStatus::Closed => Some(LinkError::stream_closed("session closed locally")),
            SessionStatus::Aborted(reason) => Some(LinkError::read(reason.clone())),
        }
    }
}

async fn shut(status: &mut watch::Receiver<SessionStatus>) {
    let _ = status.wait_for(|s| *s != SessionStatus::Open).await;
}

#[async_trait]
impl<R, W> Session for StreamSession<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    async fn read(&self, buf: &mut [u8]) -> LinkResult<usize> {
        if let Some(err) = self.read_error() {
            return Err(err);
        }
        let mut status = self.status.subscribe();

        let mut reader = tokio::select! {
            biased;
            _ = shut(&mut status) => return Err(self.shut_error()),
            guard = self.reader.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = shut(&mut status) => Err(self.shut_error()),
            res = reader.read(buf) => res.map_err(LinkError::read_io),
        }
    }

    async fn write(&self, data: &[u8]) -> LinkResult<usize> {
        if self.is_closed() {
            return Err(LinkError::write("session is closed"));
        }
        let mut status = self.status.subscribe();

        let mut writer = tokio::select! {
            biased;
            _ = shut(&mut status) => return Err(LinkError::write("session closed during write")),
            guard = self.writer.lock() => guard,
        };

        let res = tokio::select! {
            biased;
            _ = shut(&mut status) => return Err(LinkError::write("session closed during write")),
            res = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => res,
        };

        res.map(|_| data.len()).map_err(LinkError::write_io)
    }

    async fn close(&self) -> LinkResult<()> {
        let changed = self.status.send_if_modified(|status| {
            if *status == SessionStatus::Open {
                *status = SessionStatus::Closed;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(peer = %self.peer, "Closing session");
        }

        // Pending writes observe the status change and release the half
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.peer, "Shutdown after close: {}", e);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.status.borrow() != SessionStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemorySession;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::timeout;

    fn pair() -> (Arc<MemorySession>, DuplexStream) {
        let (local, remote) = duplex(256);
        let (r, w) = tokio::io::split(local);
        (Arc::new(MemorySession::new(PeerAddress::new("mem:1"), r, w)), remote)
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (session, _remote) = pair();

        let reader = Arc::clone(&session);
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close().await.unwrap();

        let res = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(matches!(res, Err(LinkError::StreamClosed { .. })));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_abort_surfaces_read_error() {
        let (session, _remote) = pair();
        session.abort("link reset");

        let mut buf = [0u8; 16];
        let res = session.read(&mut buf).await;
        assert!(matches!(res, Err(LinkError::Read { .. })));
    }

    #[tokio::test]
    async fn test_round_trip_and_peer_eof() {
        let (session, mut remote) = pair();

        assert_eq!(session.write(b"ping").await.unwrap(), 4);
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(remote);
        let mut buf = [0u8; 16];
        assert_eq!(session.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_writes() {
        let (session, _remote) = pair();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(matches!(session.write(b"x").await, Err(LinkError::Write { .. })));
    }
}

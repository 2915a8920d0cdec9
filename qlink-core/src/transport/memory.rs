// In-memory transport
//
// Scriptable stand-in for a radio link. Each dial pops the next plan queued
// for the peer's address; sessions are backed by `tokio::io::duplex` and the
// far side is handed out as a `RemoteEnd`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tracing::debug;

use super::{Session, StreamSession, Transport};
use crate::error::{LinkError, LinkResult};
use crate::peer::{PeerAddress, ServiceId};

pub type MemorySession = StreamSession<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

const PIPE_CAPACITY: usize = 64 * 1024;

enum DialPlan {
    Accept,
    Refuse(String),
    Hang,
    Gated(oneshot::Receiver<LinkResult<Arc<MemorySession>>>),
}

#[derive(Default)]
struct MemoryInner {
    plans: HashMap<String, VecDeque<DialPlan>>,
    remotes: HashMap<String, VecDeque<RemoteEnd>>,
    dials: Vec<(PeerAddress, ServiceId)>,
    discovery_cancels: usize,
    discovery_failure: Option<String>,
    calls: Vec<&'static str>,
}

/// Transport whose dial outcomes are scripted per peer address.
///
/// A dial with no queued plan is accepted.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&self, address: &str) {
        self.push(address, DialPlan::Accept);
    }

    pub fn refuse(&self, address: &str, reason: impl Into<String>) {
        self.push(address, DialPlan::Refuse(reason.into()));
    }

    /// Next dial to `address` never completes on its own
    pub fn hang(&self, address: &str) {
        self.push(address, DialPlan::Hang);
    }

    /// Next dial to `address` waits until the returned gate is resolved
    pub fn gate(&self, address: &str) -> DialGate {
        let (tx, rx) = oneshot::channel();
        self.push(address, DialPlan::Gated(rx));
        DialGate {
            peer: PeerAddress::new(address),
            tx,
        }
    }

    /// Next `cancel_discovery` fails with `reason`
    pub fn fail_discovery(&self, reason: impl Into<String>) {
        self.inner.lock().discovery_failure = Some(reason.into());
    }

    /// Far side of the oldest accepted, unclaimed session to `address`
    pub fn take_remote(&self, address: &str) -> Option<RemoteEnd> {
        self.inner.lock().remotes.get_mut(address)?.pop_front()
    }

    pub fn dials(&self) -> Vec<(PeerAddress, ServiceId)> {
        self.inner.lock().dials.clone()
    }

    pub fn discovery_cancels(&self) -> usize {
        self.inner.lock().discovery_cancels
    }

    /// Order of `cancel_discovery` / `dial` invocations
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().calls.clone()
    }

    fn push(&self, address: &str, plan: DialPlan) {
        self.inner
            .lock()
            .plans
            .entry(address.to_string())
            .or_default()
            .push_back(plan);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, peer: &PeerAddress, service: ServiceId) -> LinkResult<Arc<dyn Session>> {
        let plan = {
            let mut inner = self.inner.lock();
            inner.dials.push((peer.clone(), service));
            inner.calls.push("dial");
            inner
                .plans
                .get_mut(peer.address())
                .and_then(|queue| queue.pop_front())
                .unwrap_or(DialPlan::Accept)
        };

        match plan {
            DialPlan::Accept => {
                let (session, remote) = open_pipe(peer);
                let mut inner = self.inner.lock();
                let queue = inner.remotes.entry(peer.address().to_string()).or_default();
                queue.retain(|unclaimed| unclaimed.local.strong_count() > 0);
                queue.push_back(remote);
                Ok(session)
            }
            DialPlan::Refuse(reason) => Err(LinkError::dial(reason)),
            DialPlan::Hang => {
                std::future::pending::<()>().await;
                Err(LinkError::internal("pending dial resumed"))
            }
            DialPlan::Gated(rx) => match rx.await {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(LinkError::dial("dial gate dropped")),
            },
        }
    }

    async fn cancel_discovery(&self) -> LinkResult<()> {
        let mut inner = self.inner.lock();
        inner.discovery_cancels += 1;
        inner.calls.push("cancel_discovery");
        match inner.discovery_failure.take() {
            Some(reason) => Err(LinkError::discovery(reason)),
            None => Ok(()),
        }
    }
}

fn open_pipe(peer: &PeerAddress) -> (Arc<MemorySession>, RemoteEnd) {
    let (local, remote) = duplex(PIPE_CAPACITY);
    let (reader, writer) = tokio::io::split(local);
    let session = Arc::new(MemorySession::new(peer.clone(), reader, writer));
    let remote = RemoteEnd {
        peer: peer.clone(),
        stream: remote,
        local: Arc::downgrade(&session),
    };
    (session, remote)
}

/// Holds a gated dial open until the test or host decides its outcome
pub struct DialGate {
    peer: PeerAddress,
    tx: oneshot::Sender<LinkResult<Arc<MemorySession>>>,
}

impl DialGate {
    /// Complete the dial. Returns `None` when the dial was already abandoned,
    /// in which case the session never existed from the dialer's view.
    pub fn succeed(self) -> Option<RemoteEnd> {
        let (session, remote) = open_pipe(&self.peer);
        match self.tx.send(Ok(session)) {
            Ok(()) => Some(remote),
            Err(_) => {
                debug!(peer = %self.peer, "Gate resolved after dial was abandoned");
                None
            }
        }
    }

    /// Fail the dial. Returns `false` when the dial was already abandoned.
    pub fn fail(self, reason: impl Into<String>) -> bool {
        self.tx.send(Err(LinkError::dial(reason))).is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The peer's side of an in-memory session.
///
/// Only a weak reference to the local session is kept, so a session the
/// dialer drops is torn down exactly as a dropped socket would be.
pub struct RemoteEnd {
    peer: PeerAddress,
    stream: DuplexStream,
    local: Weak<MemorySession>,
}

impl RemoteEnd {
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await
    }

    /// Read what the local side wrote. `Ok(0)` once the local side closed.
    pub async fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf).await
    }

    /// Peer closes the stream cleanly; the local reader sees end-of-stream
    pub fn hang_up(self) {
        drop(self.stream);
    }

    /// Link breaks; the local reader sees a read error
    pub fn break_link(self, reason: impl Into<String>) {
        if let Some(local) = self.local.upgrade() {
            local.abort(reason);
        }
    }

    /// True once the local session was closed or dropped
    pub fn is_local_closed(&self) -> bool {
        self.local.upgrade().map_or(true, |local| local.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let transport = MemoryTransport::new();
        transport.refuse("a", "busy");
        transport.accept("a");

        let peer = PeerAddress::new("a");
        assert!(transport.dial(&peer, ServiceId::QONTROL).await.is_err());
        assert!(transport.dial(&peer, ServiceId::QONTROL).await.is_ok());
        assert!(transport.take_remote("a").is_some());
        assert_eq!(transport.dials().len(), 2);
    }

    #[tokio::test]
    async fn test_gate_reports_abandoned_dial() {
        let transport = MemoryTransport::new();
        let gate = transport.gate("a");

        let dialer = transport.clone();
        let task = tokio::spawn(async move {
            let peer = PeerAddress::new("a");
            dialer.dial(&peer, ServiceId::QONTROL).await.map(|_| ())
        });
        while transport.dials().is_empty() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert!(gate.is_abandoned());
        assert!(gate.succeed().is_none());
    }

    #[tokio::test]
    async fn test_unclaimed_remotes_of_dropped_sessions_are_pruned() {
        let transport = MemoryTransport::new();
        let peer = PeerAddress::new("a");

        let dropped = transport.dial(&peer, ServiceId::QONTROL).await.unwrap();
        drop(dropped);
        let _kept = transport.dial(&peer, ServiceId::QONTROL).await.unwrap();

        let remote = transport.take_remote("a").unwrap();
        assert!(!remote.is_local_closed());
        assert!(transport.take_remote("a").is_none());
    }

    #[tokio::test]
    async fn test_scripted_discovery_failure_fires_once() {
        let transport = MemoryTransport::new();
        transport.fail_discovery("scan busy");

        let err = transport.cancel_discovery().await.unwrap_err();
        assert!(matches!(err, LinkError::Discovery { .. }));
        assert!(transport.cancel_discovery().await.is_ok());
        assert_eq!(transport.discovery_cancels(), 2);
    }

    #[tokio::test]
    async fn test_remote_hang_up_is_end_of_stream() {
        let transport = MemoryTransport::new();
        let session = transport
            .dial(&PeerAddress::new("a"), ServiceId::QONTROL)
            .await
            .unwrap();
        let mut remote = transport.take_remote("a").unwrap();

        remote.send(b"hi").await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(session.read(&mut buf).await.unwrap(), 2);

        remote.hang_up();
        assert_eq!(session.read(&mut buf).await.unwrap(), 0);
    }
}

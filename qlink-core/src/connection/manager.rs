// Connection manager: the link state machine
//
// One lock guards the state, the current worker handles and the worker id
// counter. It is never held across an await. Worker callbacks carry the id
// they were started with; a callback whose id no longer matches the current
// handle of its kind is discarded.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use super::cancel::{cancel_pair, CancelHandle};
use super::connect_worker::ConnectWorker;
use super::state::{ConnectionEvent, ConnectionState, ConnectionStatus};
use super::stats::ConnectionStats;
use super::stream_worker::StreamWorker;
use crate::error::{LinkError, LinkResult};
use crate::logging::worker_span;
use crate::peer::PeerAddress;
use crate::transport::{LinkConfig, Session, Transport};

struct ConnectorHandle {
    id: u64,
    cancel: CancelHandle,
}

struct StreamHandle {
    id: u64,
    cancel: CancelHandle,
    session: Arc<dyn Session>,
}

struct Inner {
    state: ConnectionState,
    peer: Option<PeerAddress>,
    next_worker_id: u64,
    connector: Option<ConnectorHandle>,
    streamer: Option<StreamHandle>,
    subscribers: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
    inbound: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    stats: ConnectionStats,
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_worker_id += 1;
        self.next_worker_id
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state != to {
            info!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
        }
    }

    // Sent under the lock, so subscribers observe transitions in order
    fn emit(&mut self, status: ConnectionStatus, peer: PeerAddress, reason: Option<String>) {
        let event = ConnectionEvent::new(status, peer, reason);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Cancel both workers and drop their handles
    fn cancel_workers(&mut self) {
        if let Some(connector) = self.connector.take() {
            debug!(worker_id = connector.id, "Cancelling connect worker");
            connector.cancel.cancel();
        }
        if let Some(streamer) = self.streamer.take() {
            debug!(worker_id = streamer.id, "Cancelling stream worker");
            streamer.cancel.cancel();
            self.stats.record_disconnect(false);
        }
    }

    fn is_current_connector(&self, id: u64) -> bool {
        self.connector.as_ref().map(|c| c.id) == Some(id)
    }

    fn is_current_streamer(&self, id: u64) -> bool {
        self.streamer.as_ref().map(|s| s.id) == Some(id)
    }
}

/// State shared between the manager and its worker tasks
pub(crate) struct Shared {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    runtime: Handle,
    inner: Mutex<Inner>,
}

impl Shared {
    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// A connect worker opened `session`. Hands back the session when the
    /// worker has been superseded; the caller must close it.
    pub(crate) fn on_connected(
        self: &Arc<Self>,
        id: u64,
        session: Arc<dyn Session>,
    ) -> Result<(), Arc<dyn Session>> {
        let mut inner = self.inner.lock();

        if !inner.is_current_connector(id) {
            warn!(worker_id = id, peer = %session.peer(), "Discarding session from superseded connect worker");
            return Err(session);
        }
        inner.connector = None;
        inner.cancel_workers();

        let stream_id = inner.allocate_id();
        let (cancel, cancelled) = cancel_pair();
        let peer = session.peer().clone();

        inner.streamer = Some(StreamHandle {
            id: stream_id,
            cancel,
            session: Arc::clone(&session),
        });
        inner.peer = Some(peer.clone());
        inner.stats.record_connect();
        inner.transition(ConnectionState::Connected);
        inner.emit(ConnectionStatus::Connected, peer.clone(), None);

        let worker = StreamWorker::new(stream_id, Arc::clone(self), session, cancelled);
        self.runtime
            .spawn(worker.run().instrument(worker_span("stream", stream_id, &peer)));
        Ok(())
    }

    pub(crate) fn on_connect_failed(&self, id: u64, peer: &PeerAddress, error: LinkError) {
        let mut inner = self.inner.lock();

        if !inner.is_current_connector(id) {
            debug!(worker_id = id, "Ignoring failure from superseded connect worker: {}", error);
            return;
        }
        inner.connector = None;
        inner.peer = None;
        inner.stats.record_dial_failure();
        inner.transition(ConnectionState::Idle);
        inner.emit(ConnectionStatus::Failed, peer.clone(), Some(error.to_string()));
    }

    pub(crate) fn on_link_lost(&self, id: u64, error: LinkError) {
        let mut inner = self.inner.lock();

        if !inner.is_current_streamer(id) {
            debug!(worker_id = id, "Ignoring link loss from superseded stream worker: {}", error);
            return;
        }
        let streamer = inner.streamer.take();
        let peer = streamer
            .map(|s| s.session.peer().clone())
            .or_else(|| inner.peer.clone());
        inner.peer = None;
        inner.stats.record_disconnect(true);
        inner.transition(ConnectionState::Idle);
        if let Some(peer) = peer {
            inner.emit(ConnectionStatus::Lost, peer, Some(error.to_string()));
        }
    }

    /// Inbound chunk from a stream worker. Returns `false` once superseded.
    pub(crate) fn on_inbound(&self, id: u64, chunk: &[u8]) -> bool {
        let mut inner = self.inner.lock();

        if !inner.is_current_streamer(id) {
            return false;
        }
        inner.stats.record_received(chunk.len());
        if !inner.inbound.is_empty() {
            let chunk = chunk.to_vec();
            inner.inbound.retain(|tx| tx.send(chunk.clone()).is_ok());
        }
        true
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Idle && inner.connector.is_none() && inner.streamer.is_none() {
            return;
        }
        inner.cancel_workers();
        inner.peer = None;
        inner.transition(ConnectionState::Idle);
    }
}

/// Supervises the single link to a peer.
///
/// Every public method returns without waiting on I/O except [`write`],
/// which waits only for the write itself. Dropping the manager stops both
/// workers.
///
/// [`write`]: ConnectionManager::write
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager that spawns its workers on the current tokio runtime
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> LinkResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| LinkError::internal("ConnectionManager::new requires a tokio runtime"))?;
        Self::with_runtime(transport, config, runtime)
    }

    /// Create a manager that spawns its workers on `runtime`
    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        runtime: Handle,
    ) -> LinkResult<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                config,
                runtime,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    peer: None,
                    next_worker_id: 0,
                    connector: None,
                    streamer: None,
                    subscribers: Vec::new(),
                    inbound: Vec::new(),
                    stats: ConnectionStats::new(),
                }),
            }),
        })
    }

    /// Connect to `peer`, superseding any attempt or session in progress
    pub fn connect(&self, peer: PeerAddress) {
        let mut inner = self.shared.inner.lock();

        inner.cancel_workers();

        let id = inner.allocate_id();
        let (cancel, cancelled) = cancel_pair();
        inner.connector = Some(ConnectorHandle { id, cancel });
        inner.peer = Some(peer.clone());
        inner.stats.record_attempt();
        inner.transition(ConnectionState::Connecting);
        inner.emit(ConnectionStatus::Connecting, peer.clone(), None);

        info!(worker_id = id, "Connecting to {}", peer);
        let span = worker_span("connect", id, &peer);
        let worker = ConnectWorker::new(id, Arc::clone(&self.shared), peer, cancelled);
        self.shared.runtime.spawn(worker.run().instrument(span));
    }

    /// Cancel any attempt and close any session. No-op when idle.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Peer of the attempt or session in progress
    pub fn peer(&self) -> Option<PeerAddress> {
        self.shared.inner.lock().peer.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Write to the live session.
    ///
    /// A failed write is reported here only; it does not change the
    /// connection state or stop the read loop.
    pub async fn write(&self, data: &[u8]) -> LinkResult<usize> {
        let (id, session) = {
            let inner = self.shared.inner.lock();
            match (&inner.streamer, inner.state) {
                (Some(streamer), ConnectionState::Connected) => {
                    (streamer.id, Arc::clone(&streamer.session))
                }
                _ => return Err(LinkError::NotConnected),
            }
        };

        let result = session.write(data).await;

        let mut inner = self.shared.inner.lock();
        if inner.is_current_streamer(id) {
            match &result {
                Ok(n) => inner.stats.record_sent(*n),
                Err(e) => {
                    warn!(worker_id = id, "Write failed: {}", e);
                    inner.stats.record_write_failure();
                }
            }
        }
        result
    }

    /// Receive every lifecycle notification from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.inner.lock().subscribers.push(tx);
        rx
    }

    /// Receive raw chunks read from the live session, unframed
    pub fn subscribe_inbound(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.inner.lock().inbound.push(tx);
        rx
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.inner.lock().stats.clone()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    #[cfg(test)]
    pub(crate) fn current_connector_id(&self) -> Option<u64> {
        self.shared.inner.lock().connector.as_ref().map(|c| c.id)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

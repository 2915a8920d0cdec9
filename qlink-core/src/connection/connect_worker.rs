// Connect worker: exactly one dial attempt per worker, no retry

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cancel::Cancelled;
use super::manager::Shared;
use crate::error::{LinkError, LinkResult};
use crate::peer::PeerAddress;
use crate::transport::Session;

pub(crate) struct ConnectWorker {
    id: u64,
    shared: Arc<Shared>,
    peer: PeerAddress,
    cancel: Cancelled,
}

impl ConnectWorker {
    pub(crate) fn new(id: u64, shared: Arc<Shared>, peer: PeerAddress, cancel: Cancelled) -> Self {
        Self {
            id,
            shared,
            peer,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        if self.cancel.is_cancelled() {
            debug!("Superseded before dialing");
            return;
        }

        // Losing the race drops the dial future, which releases the half-open handle
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Dial cancelled");
                return;
            }
            outcome = attempt(&self.shared, &self.peer) => outcome,
        };

        match outcome {
            Ok(session) => {
                info!("Dial succeeded");
                if let Err(stale) = self.shared.on_connected(self.id, session) {
                    if let Err(e) = stale.close().await {
                        warn!("Closing superseded session failed: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("Dial failed: {}", e);
                self.shared.on_connect_failed(self.id, &self.peer, e);
            }
        }
    }
}

async fn attempt(shared: &Shared, peer: &PeerAddress) -> LinkResult<Arc<dyn Session>> {
    let transport = shared.transport();
    let config = shared.config();

    if config.cancel_discovery_before_dial {
        if let Err(e) = transport.cancel_discovery().await {
            warn!("Could not halt discovery before dialing: {}", e);
        }
    }

    let dial = transport.dial(peer, config.service_id);
    match config.connect_timeout {
        Some(deadline) => tokio::time::timeout(deadline, dial).await.map_err(|_| {
            LinkError::timeout(format!("no answer from {} within {:?}", peer, deadline))
        })?,
        None => dial.await,
    }
}

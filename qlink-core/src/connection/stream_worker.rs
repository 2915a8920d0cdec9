// Stream worker: keeps a read loop alive on one session and reports its end

use std::sync::Arc;
use tracing::{debug, info, trace};

use super::cancel::Cancelled;
use super::manager::Shared;
use crate::error::LinkError;
use crate::transport::Session;

pub(crate) struct StreamWorker {
    id: u64,
    shared: Arc<Shared>,
    session: Arc<dyn Session>,
    cancel: Cancelled,
}

impl StreamWorker {
    pub(crate) fn new(
        id: u64,
        shared: Arc<Shared>,
        session: Arc<dyn Session>,
        cancel: Cancelled,
    ) -> Self {
        Self {
            id,
            shared,
            session,
            cancel,
        }
    }

    /// Read until the link ends, close the session, then report the loss once.
    /// A cancelled worker reports too; the manager has already moved on and
    /// discards it.
    pub(crate) async fn run(mut self) {
        let mut buf = vec![0u8; self.shared.config().read_buffer_size];

        let reason = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break LinkError::stream_closed("session stopped by manager");
                }
                res = self.session.read(&mut buf) => match res {
                    Ok(0) => break LinkError::stream_closed("peer closed the stream"),
                    Ok(n) => {
                        trace!("Read {} bytes", n);
                        if !self.shared.on_inbound(self.id, &buf[..n]) {
                            break LinkError::stream_closed("session superseded");
                        }
                    }
                    Err(e) => break e,
                },
            }
        };

        info!("Read loop ended: {}", reason);

        if let Err(e) = self.session.close().await {
            debug!("Close after read loop failed: {}", e);
        }

        self.shared.on_link_lost(self.id, reason);
    }
}

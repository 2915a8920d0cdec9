// Cooperative cancellation for worker tasks

use tokio::sync::watch;

/// Held by the manager. Cancelling, or dropping the handle, stops the worker.
pub(crate) struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Held by the worker and raced against its blocking operation
pub(crate) struct Cancelled {
    rx: watch::Receiver<bool>,
}

pub(crate) fn cancel_pair() -> (CancelHandle, Cancelled) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancelled { rx })
}

impl CancelHandle {
    pub(crate) fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Cancelled {
    /// Resolves once cancelled or once the handle is gone
    pub(crate) async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (handle, mut cancelled) = cancel_pair();
        assert!(!cancelled.is_cancelled());

        let waiter = tokio::spawn(async move {
            cancelled.cancelled().await;
        });
        handle.cancel();

        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels() {
        let (handle, mut cancelled) = cancel_pair();
        drop(handle);

        assert!(cancelled.is_cancelled());
        timeout(Duration::from_secs(1), cancelled.cancelled()).await.unwrap();
    }
}

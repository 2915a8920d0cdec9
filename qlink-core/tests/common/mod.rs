// Shared helpers for link integration tests

#![allow(dead_code)]

use qlink_core::{ConnectionEvent, ConnectionManager, ConnectionStatus, LinkConfig, MemoryTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

pub fn manager(transport: &MemoryTransport) -> ConnectionManager {
    manager_with(transport, LinkConfig::default())
}

pub fn manager_with(transport: &MemoryTransport, config: LinkConfig) -> ConnectionManager {
    ConnectionManager::new(Arc::new(transport.clone()), config).expect("manager")
}

pub async fn next_event(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("Should receive event within timeout")
        .expect("event channel closed")
}

/// Next event, asserting its status and peer address
pub async fn expect_event(
    rx: &mut UnboundedReceiver<ConnectionEvent>,
    status: ConnectionStatus,
    address: &str,
) -> ConnectionEvent {
    let event = next_event(rx).await;
    assert_eq!(event.status, status, "unexpected event {:?}", event);
    assert_eq!(event.peer.address(), address, "unexpected peer in {:?}", event);
    event
}

/// Assert nothing further arrives for a while
pub async fn expect_quiet(rx: &mut UnboundedReceiver<ConnectionEvent>) {
    sleep(QUIET_PERIOD).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event {:?}", event);
    }
}

/// Wait until `predicate` holds, polling the runtime in between
pub async fn eventually(mut predicate: impl FnMut() -> bool) {
    timeout(EVENT_TIMEOUT, async {
        while !predicate() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

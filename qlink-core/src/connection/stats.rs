// Link counters, updated under the manager lock

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub connect_attempts: u64,
    pub sessions_opened: u64,
    pub dial_failures: u64,
    pub links_lost: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub write_failures: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&mut self) {
        self.connect_attempts += 1;
    }

    pub(crate) fn record_connect(&mut self) {
        self.sessions_opened += 1;
        self.connected_at = Some(Utc::now());
    }

    pub(crate) fn record_dial_failure(&mut self) {
        self.dial_failures += 1;
    }

    pub(crate) fn record_disconnect(&mut self, lost: bool) {
        if lost {
            self.links_lost += 1;
        }
        self.disconnected_at = Some(Utc::now());
    }

    pub(crate) fn record_received(&mut self, size: usize) {
        self.bytes_received += size as u64;
    }

    pub(crate) fn record_sent(&mut self, size: usize) {
        self.bytes_sent += size as u64;
    }

    pub(crate) fn record_write_failure(&mut self) {
        self.write_failures += 1;
    }

    /// Time spent in the current session, if one is live
    pub fn uptime(&self) -> Option<chrono::Duration> {
        let connected_at = self.connected_at?;
        match self.disconnected_at {
            Some(disconnected_at) if disconnected_at >= connected_at => None,
            _ => Some(Utc::now() - connected_at),
        }
    }
}

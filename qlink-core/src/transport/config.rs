// Link configuration

use serde::Deserialize;
use std::time::Duration;

use crate::error::{LinkError, LinkResult};
use crate::peer::ServiceId;

/// Configuration shared by the manager and its workers
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Service the peer listens on
    pub service_id: ServiceId,
    /// Size of the stream worker's read buffer
    pub read_buffer_size: usize,
    /// Deadline for a single dial. `None` waits for the transport.
    pub connect_timeout: Option<Duration>,
    /// Halt discovery on the transport before every dial
    pub cancel_discovery_before_dial: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_id: ServiceId::QONTROL,
            read_buffer_size: 1024,
            connect_timeout: None,
            cancel_discovery_before_dial: true,
        }
    }
}

impl LinkConfig {
    /// Create configuration builder
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }

    pub fn validate(&self) -> LinkResult<()> {
        if self.read_buffer_size == 0 {
            return Err(LinkError::config("read_buffer_size must be non-zero"));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(LinkError::config("connect_timeout must be non-zero when set"));
        }
        Ok(())
    }

    /// Parse the JSON form used by FFI hosts. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> LinkResult<Self> {
        let raw: RawLinkConfig = serde_json::from_str(json)
            .map_err(|e| LinkError::config(format!("malformed config: {}", e)))?;

        let mut builder = LinkConfig::builder();
        if let Some(service_id) = raw.service_id {
            builder = builder.service_id(service_id);
        }
        if let Some(size) = raw.read_buffer_size {
            builder = builder.read_buffer_size(size);
        }
        if let Some(ms) = raw.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(cancel) = raw.cancel_discovery_before_dial {
            builder = builder.cancel_discovery_before_dial(cancel);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLinkConfig {
    service_id: Option<ServiceId>,
    read_buffer_size: Option<usize>,
    connect_timeout_ms: Option<u64>,
    cancel_discovery_before_dial: Option<bool>,
}

/// Link configuration builder
#[derive(Default)]
pub struct LinkConfigBuilder {
    service_id: Option<ServiceId>,
    read_buffer_size: Option<usize>,
    connect_timeout: Option<Duration>,
    cancel_discovery_before_dial: Option<bool>,
}

impl LinkConfigBuilder {
    /// Set the service identifier
    pub fn service_id(mut self, service_id: ServiceId) -> Self {
        self.service_id = Some(service_id);
        self
    }

    /// Set read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = Some(size);
        self
    }

    /// Set dial deadline
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn cancel_discovery_before_dial(mut self, enabled: bool) -> Self {
        self.cancel_discovery_before_dial = Some(enabled);
        self
    }

    /// Build configuration
    pub fn build(self) -> LinkConfig {
        let default = LinkConfig::default();

        LinkConfig {
            service_id: self.service_id.unwrap_or(default.service_id),
            read_buffer_size: self.read_buffer_size.unwrap_or(default.read_buffer_size),
            connect_timeout: self.connect_timeout.or(default.connect_timeout),
            cancel_discovery_before_dial: self
                .cancel_discovery_before_dial
                .unwrap_or(default.cancel_discovery_before_dial),
        }
    }
}

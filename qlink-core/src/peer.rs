// Peer identity and the service identifier shared with the listening side

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LinkError, LinkResult};

/// Address of a remote endpoint plus an optional human-readable name.
///
/// The address is opaque to the link layer; only the transport interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    address: String,
    name: Option<String>,
}

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name if known, address otherwise
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Well-known identifier of the service the peer listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Service record published by the Qontrol desktop server
    pub const QONTROL: ServiceId = ServiceId(Uuid::from_u128(0x94f39d29_7d6d_437d_973b_fba39e49d4ee));

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::QONTROL
    }
}

impl FromStr for ServiceId {
    type Err = LinkError;

    fn from_str(s: &str) -> LinkResult<Self> {
        Uuid::parse_str(s)
            .map(ServiceId)
            .map_err(|e| LinkError::config(format!("invalid service id '{}': {}", s, e)))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

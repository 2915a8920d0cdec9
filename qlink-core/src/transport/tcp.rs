// TCP transport
//
// Peer addresses are `host:port`, or a bare `host` whose port comes from the
// per-service port table (the TCP stand-in for a service record lookup).

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{Session, StreamSession, Transport};
use crate::error::{LinkError, LinkResult};
use crate::peer::{PeerAddress, ServiceId};

pub type TcpSession = StreamSession<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>;

#[derive(Debug, Clone)]
pub struct TcpTransport {
    service_ports: HashMap<ServiceId, u16>,
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            service_ports: HashMap::new(),
            nodelay: true,
        }
    }

    /// Port to dial when a peer address carries no port of its own
    pub fn with_service_port(mut self, service: ServiceId, port: u16) -> Self {
        self.service_ports.insert(service, port);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    fn resolve(&self, peer: &PeerAddress, service: ServiceId) -> LinkResult<String> {
        let address = peer.address().trim();
        if address.is_empty() {
            return Err(LinkError::invalid_address("empty address"));
        }

        if address.parse::<SocketAddr>().is_ok() {
            return Ok(address.to_string());
        }

        // host:port, excluding bare IPv6 literals which contain colons of their own
        if let Some((host, port)) = address.rsplit_once(':') {
            if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() {
                return Ok(address.to_string());
            }
        }

        let port = self.service_ports.get(&service).ok_or_else(|| {
            LinkError::invalid_address(format!(
                "'{}' has no port and service {} has no registered port",
                address, service
            ))
        })?;

        if address.contains(':') {
            Ok(format!("[{}]:{}", address.trim_matches(|c| c == '[' || c == ']'), port))
        } else {
            Ok(format!("{}:{}", address, port))
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, peer: &PeerAddress, service: ServiceId) -> LinkResult<Arc<dyn Session>> {
        let target = self.resolve(peer, service)?;
        debug!("Dialing {} for service {}", target, service);

        let stream = TcpStream::connect(&target)
            .await
            .map_err(|e| LinkError::dial_io(format!("connect to {} failed", target), e))?;

        if let Err(e) = stream.set_nodelay(self.nodelay) {
            debug!("Could not set TCP_NODELAY on {}: {}", target, e);
        }

        info!("TCP session open to {}", target);
        let (reader, writer) = stream.into_split();
        Ok(Arc::new(TcpSession::new(peer.clone(), reader, writer)))
    }

    async fn cancel_discovery(&self) -> LinkResult<()> {
        // Nothing to halt: TCP peers are resolved, not discovered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_explicit_port() {
        let transport = TcpTransport::new();
        let peer = PeerAddress::new("127.0.0.1:4000");
        assert_eq!(transport.resolve(&peer, ServiceId::QONTROL).unwrap(), "127.0.0.1:4000");

        let peer = PeerAddress::new("desk.local:4000");
        assert_eq!(transport.resolve(&peer, ServiceId::QONTROL).unwrap(), "desk.local:4000");

        let peer = PeerAddress::new("[::1]:4000");
        assert_eq!(transport.resolve(&peer, ServiceId::QONTROL).unwrap(), "[::1]:4000");
    }

    #[test]
    fn test_resolve_service_port() {
        let transport = TcpTransport::new().with_service_port(ServiceId::QONTROL, 7331);

        let peer = PeerAddress::new("desk.local");
        assert_eq!(transport.resolve(&peer, ServiceId::QONTROL).unwrap(), "desk.local:7331");

        let peer = PeerAddress::new("::1");
        assert_eq!(transport.resolve(&peer, ServiceId::QONTROL).unwrap(), "[::1]:7331");
    }

    #[test]
    fn test_resolve_without_port_fails() {
        let transport = TcpTransport::new();
        let err = transport
            .resolve(&PeerAddress::new("desk.local"), ServiceId::QONTROL)
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidAddress { .. }));

        let err = transport.resolve(&PeerAddress::new("  "), ServiceId::QONTROL).unwrap_err();
        assert!(matches!(err, LinkError::InvalidAddress { .. }));
    }
}

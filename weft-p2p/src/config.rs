//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use weft_core::NodeId;

use crate::error::{P2pError, P2pResult};
use crate::transport::{ChannelFactory, ExternalServer};

/// Bytes every frame on an opaque byte-stream channel starts with.
pub const FRAME_MAGIC: [u8; 4] = *b"WEFT";

/// Largest frame accepted from the wire.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default host the self-managed listener binds and advertises.
pub const DEFAULT_HOST: &str = "localhost";

/// Default deadline for establishing an outbound connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for completing the identifier handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay hop budget carried on every data frame. A frame that spends
/// the whole budget without reaching its destination comes to rest in a
/// pending queue instead of circulating the mesh.
pub const MAX_RELAY_HOPS: u8 = 16;

/// Configuration for a [`Client`](crate::Client).
///
/// All fields have working defaults; a default client generates a fresh
/// identifier, runs no listener and dials nobody.
pub struct ClientConfig {
    /// Fixed node identifier. Generated randomly when absent.
    pub id: Option<NodeId>,
    /// Port for the self-managed listener. Port 0 binds an ephemeral port.
    /// No listener is started when absent.
    pub port: Option<u16>,
    /// Host the self-managed listener binds and advertises. Requires `port`.
    pub host: Option<String>,
    /// Externally managed server to take inbound connections from instead
    /// of a self-managed listener. Mutually exclusive with `host`/`port`.
    pub server: Option<ExternalServer>,
    /// URLs dialed in order at startup.
    pub bootstrap: Vec<String>,
    /// Factory for outbound channels with non-WebSocket URL schemes.
    pub transport: Option<Arc<dyn ChannelFactory>>,
    /// Skip TLS certificate verification on `wss://` dials.
    pub allow_insecure_tls: bool,
    /// Deadline for establishing an outbound connection.
    pub connect_timeout: Duration,
    /// Deadline for completing the identifier handshake.
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: None,
            port: None,
            host: None,
            server: None,
            bootstrap: Vec::new(),
            transport: None,
            allow_insecure_tls: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fixed node identifier.
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Start a self-managed listener on the given port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Host the self-managed listener binds and advertises.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Take inbound connections from an externally managed server.
    pub fn with_server(mut self, server: ExternalServer) -> Self {
        self.server = Some(server);
        self
    }

    /// URLs dialed in order at startup.
    pub fn with_bootstrap<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Install a factory for outbound non-WebSocket channels.
    pub fn with_transport(mut self, factory: Arc<dyn ChannelFactory>) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Skip TLS certificate verification on `wss://` dials.
    pub fn with_insecure_tls(mut self) -> Self {
        self.allow_insecure_tls = true;
        self
    }

    /// Override the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Check the configuration for conflicting or incomplete options.
    pub fn validate(&self) -> P2pResult<()> {
        if self.server.is_some() && (self.port.is_some() || self.host.is_some()) {
            return Err(P2pError::Config(
                "`server` is mutually exclusive with `host`/`port`".into(),
            ));
        }
        if self.host.is_some() && self.port.is_none() {
            return Err(P2pError::Config("`host` requires `port`".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn listener_config_is_valid() {
        let config = ClientConfig::new().with_port(0).with_host("localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn server_conflicts_with_port() {
        let (_handle, server) = ExternalServer::channel(Some("ws://x:1".into()));
        let config = ClientConfig::new().with_server(server).with_port(8001);
        assert!(matches!(config.validate(), Err(P2pError::Config(_))));
    }

    #[test]
    fn host_without_port_is_rejected() {
        let config = ClientConfig::new().with_host("example.com");
        assert!(matches!(config.validate(), Err(P2pError::Config(_))));
    }
}

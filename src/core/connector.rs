//! Outbound connect helper

use crate::error::{NetworkError, Result};
use crate::stability::ShutdownSignal;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Connector configuration
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    /// Give up on the connect attempt after this long
    pub connect_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the new socket
    pub nodelay: bool,
    /// TCP keep-alive idle time
    pub keep_alive: Option<Duration>,
}

impl ConnectorConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set `TCP_NODELAY`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Set keep-alive interval
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }
}

/// Stateless outbound connector
///
/// Produces a connected stream for a [`Session`](crate::Session) to adopt.
/// There is no retry policy; callers decide whether to try again.
pub struct Connector;

impl Connector {
    /// Connect to `addr` unless `cancel` fires first
    pub async fn connect(addr: SocketAddr, cancel: &ShutdownSignal) -> Result<TcpStream> {
        Self::connect_with_config(addr, &ConnectorConfig::default(), cancel).await
    }

    /// Parse `address` and connect to it
    pub async fn connect_str(address: &str, cancel: &ShutdownSignal) -> Result<TcpStream> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| NetworkError::invalid_address(format!("Invalid address: {}", e)))?;
        Self::connect(addr, cancel).await
    }

    /// Connect with explicit socket options
    ///
    /// # Errors
    ///
    /// `Cancelled` if the signal fires first, `Timeout` if the configured
    /// connect timeout expires, `Connection` if the connect itself fails.
    pub async fn connect_with_config(
        addr: SocketAddr,
        config: &ConnectorConfig,
        cancel: &ShutdownSignal,
    ) -> Result<TcpStream> {
        if cancel.is_triggered() {
            return Err(NetworkError::Cancelled);
        }

        let attempt = async {
            let connected = match config.connect_timeout {
                Some(limit) => timeout(limit, TcpStream::connect(addr))
                    .await
                    .map_err(|_| NetworkError::timeout("Connection timed out"))?,
                None => TcpStream::connect(addr).await,
            };
            connected.map_err(|e| NetworkError::connection(format!("Failed to connect: {}", e)))
        };

        // A cancelled attempt drops the half-open socket, which closes it.
        let stream = tokio::select! {
            result = attempt => result?,
            _ = cancel.wait() => return Err(NetworkError::Cancelled),
        };

        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        if let Some(keep_alive) = config.keep_alive {
            let keep_alive = socket2::TcpKeepalive::new().with_time(keep_alive);
            socket2::SockRef::from(&stream)
                .set_tcp_keepalive(&keep_alive)
                .map_err(|e| NetworkError::other(format!("Failed to set keep-alive: {}", e)))?;
        }

        tracing::debug!("Connected to {}", addr);
        Ok(stream)
    }
}

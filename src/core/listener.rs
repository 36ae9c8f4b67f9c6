//! TCP listener with an accept loop

use crate::error::{NetworkError, Result};
use crate::stability::ShutdownSignal;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address
    pub bind_address: String,
    /// Pending-connection backlog passed to `listen`
    pub backlog: u32,
    /// Delay after a failed accept before trying again
    pub accept_error_backoff: Duration,
    /// Consecutive accept failures after which the listener stops itself
    pub max_consecutive_accept_errors: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            backlog: 100,
            accept_error_backoff: Duration::from_millis(50),
            max_consecutive_accept_errors: 10,
        }
    }
}

impl ListenerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new<S: Into<String>>(bind_address: S) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Default::default()
        }
    }

    /// Set listen backlog
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set delay between accept retries
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_accept_error_backoff(mut self, backoff: Duration) -> Self {
        self.accept_error_backoff = backoff;
        self
    }

    /// Set consecutive accept failure threshold
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_consecutive_accept_errors(mut self, max: u32) -> Self {
        self.max_consecutive_accept_errors = max;
        self
    }
}

/// Listener state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Initialized,
    Running,
    Stopped,
}

/// Receives every accepted connection
///
/// Typically builds a [`Session`](crate::Session) and calls `initialize` on
/// it. The accept loop awaits each call before accepting the next connection.
/// Returning an error drops the stream and the loop carries on.
#[async_trait]
pub trait AcceptHandler: Send + Sync + 'static {
    async fn on_accept(&self, stream: TcpStream, peer: SocketAddr) -> Result<()>;
}

/// Source of accepted connections; lets the loop run against a test double
#[async_trait]
trait Acceptor: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for tokio::net::TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        tokio::net::TcpListener::accept(self).await
    }
}

/// TCP listener
pub struct Listener {
    config: ListenerConfig,
    socket: Mutex<Option<Arc<tokio::net::TcpListener>>>,
    local_addr: RwLock<Option<SocketAddr>>,
    state: RwLock<ListenerState>,
    stop_signal: ShutdownSignal,
    accepted: AtomicU64,
}

impl Listener {
    /// Create a new listener
    #[must_use]
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self::with_config(ListenerConfig::new(bind_address))
    }

    /// Create a new listener with custom configuration
    #[must_use]
    pub fn with_config(config: ListenerConfig) -> Self {
        Self {
            config,
            socket: Mutex::new(None),
            local_addr: RwLock::new(None),
            state: RwLock::new(ListenerState::Created),
            stop_signal: ShutdownSignal::new(),
            accepted: AtomicU64::new(0),
        }
    }

    /// Bind and listen
    ///
    /// Must be called from inside a tokio runtime. Returns the bound address,
    /// which is how callers learn the port when binding to port 0.
    ///
    /// # Errors
    ///
    /// Fails if already initialized, stopped, or the bind itself fails.
    pub fn initialize(&self) -> Result<SocketAddr> {
        let mut socket_slot = self.socket.lock();
        if *self.state.read() != ListenerState::Created {
            return Err(NetworkError::invalid_state("Listener is already initialized"));
        }

        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| NetworkError::invalid_address(format!("Invalid address: {}", e)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket
            .bind(addr)
            .map_err(|e| NetworkError::connection(format!("Failed to bind: {}", e)))?;
        let listener = socket
            .listen(self.config.backlog)
            .map_err(|e| NetworkError::connection(format!("Failed to listen: {}", e)))?;

        let local_addr = listener.local_addr()?;
        *socket_slot = Some(Arc::new(listener));
        *self.local_addr.write() = Some(local_addr);
        *self.state.write() = ListenerState::Initialized;

        tracing::info!(
            "Listening on {} (backlog {})",
            local_addr,
            self.config.backlog
        );
        Ok(local_addr)
    }

    /// Run the accept loop until cancelled, stopped, or accept keeps failing
    ///
    /// Cancellation and `stop` both end the loop with `Ok(())`, as does giving
    /// up after too many consecutive accept failures; in that last case the
    /// listener is stopped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if called before `initialize` or after `stop`.
    pub async fn run(
        &self,
        handler: Arc<dyn AcceptHandler>,
        cancel: &ShutdownSignal,
    ) -> Result<()> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or_else(|| NetworkError::invalid_state("Call initialize() first"))?;

        {
            let mut state = self.state.write();
            if *state == ListenerState::Stopped {
                return Err(NetworkError::invalid_state("Listener is stopped"));
            }
            *state = ListenerState::Running;
        }

        self.accept_loop(&*socket, handler, cancel).await;

        let mut state = self.state.write();
        if *state == ListenerState::Running {
            *state = ListenerState::Initialized;
        }
        Ok(())
    }

    async fn accept_loop(
        &self,
        acceptor: &dyn Acceptor,
        handler: Arc<dyn AcceptHandler>,
        cancel: &ShutdownSignal,
    ) {
        let mut consecutive_errors = 0u32;

        while !cancel.is_triggered() && !self.is_stopping() {
            let accepted = tokio::select! {
                result = acceptor.accept() => result,
                _ = cancel.wait() => break,
                _ = self.stop_signal.wait() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    consecutive_errors = 0;
                    self.accepted.fetch_add(1, Ordering::Relaxed);
                    self.dispatch(&handler, stream, peer).await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        "Failed to accept connection ({} in a row): {}",
                        consecutive_errors,
                        e
                    );

                    if consecutive_errors >= self.config.max_consecutive_accept_errors {
                        tracing::error!(
                            "Accept failed {} times in a row, stopping listener",
                            consecutive_errors
                        );
                        self.stop();
                        break;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.accept_error_backoff) => {}
                        _ = cancel.wait() => break,
                        _ = self.stop_signal.wait() => break,
                    }
                }
            }
        }

        tracing::debug!("Accept loop exited");
    }

    /// Hand one connection to the accept handler
    ///
    /// The handler runs as its own task so a panic inside it stays contained.
    async fn dispatch(
        &self,
        handler: &Arc<dyn AcceptHandler>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        let handler = Arc::clone(handler);
        let task = tokio::spawn(async move { handler.on_accept(stream, peer).await });

        match task.await {
            Ok(Ok(())) => tracing::debug!("Accepted connection from {}", peer),
            Ok(Err(e)) => tracing::warn!("Accept handler failed for {}: {}", peer, e),
            Err(e) => tracing::error!("Accept handler aborted for {}: {}", peer, e),
        }
    }

    /// Stop accepting and close the listening socket
    ///
    /// Idempotent; safe to call concurrently with `run`, which it wakes.
    pub fn stop(&self) {
        if !self.stop_signal.trigger() {
            return;
        }

        *self.state.write() = ListenerState::Stopped;
        // The loop holds its own handle until it observes the signal.
        self.socket.lock().take();
        tracing::info!("Listener stopped");
    }

    fn is_stopping(&self) -> bool {
        self.stop_signal.is_triggered()
    }

    /// Get listener state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    /// Address the listener is bound to, once initialized
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Connections accepted so far
    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("bind_address", &self.config.bind_address)
            .field("local_addr", &self.local_addr())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FailingAcceptor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Acceptor for FailingAcceptor {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl AcceptHandler for NoopHandler {
        async fn on_accept(&self, _stream: TcpStream, _peer: SocketAddr) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_listener_config() {
        let config = ListenerConfig::new("0.0.0.0:9000")
            .with_backlog(16)
            .with_accept_error_backoff(Duration::from_millis(5))
            .with_max_consecutive_accept_errors(3);

        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.backlog, 16);
        assert_eq!(config.accept_error_backoff, Duration::from_millis(5));
        assert_eq!(config.max_consecutive_accept_errors, 3);

        let defaults = ListenerConfig::default();
        assert_eq!(defaults.backlog, 100);
        assert_eq!(defaults.accept_error_backoff, Duration::from_millis(50));
        assert_eq!(defaults.max_consecutive_accept_errors, 10);
    }

    #[test]
    fn test_listener_creation() {
        let listener = Listener::new("127.0.0.1:0");
        assert_eq!(listener.state(), ListenerState::Created);
        assert!(listener.local_addr().is_none());
        assert_eq!(listener.accepted_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let listener = Listener::new("not an address");
        let err = listener.initialize().unwrap_err();
        assert!(matches!(err, NetworkError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_double_initialize_rejected() {
        let listener = Listener::new("127.0.0.1:0");
        listener.initialize().unwrap();
        assert_eq!(listener.state(), ListenerState::Initialized);
        assert!(listener.initialize().is_err());
    }

    #[tokio::test]
    async fn test_run_before_initialize_rejected() {
        let listener = Listener::new("127.0.0.1:0");
        let result = listener
            .run(Arc::new(NoopHandler), &ShutdownSignal::new())
            .await;
        assert!(matches!(result, Err(NetworkError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_consecutive_errors() {
        let listener = Listener::with_config(
            ListenerConfig::new("127.0.0.1:0").with_max_consecutive_accept_errors(10),
        );
        let acceptor = FailingAcceptor {
            calls: AtomicU32::new(0),
        };

        listener
            .accept_loop(&acceptor, Arc::new(NoopHandler), &ShutdownSignal::new())
            .await;

        assert_eq!(acceptor.calls.load(Ordering::SeqCst), 10);
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let listener = Listener::with_config(
            ListenerConfig::new("127.0.0.1:0")
                .with_accept_error_backoff(Duration::from_secs(3600))
                .with_max_consecutive_accept_errors(10),
        );
        let acceptor = FailingAcceptor {
            calls: AtomicU32::new(0),
        };
        let cancel = ShutdownSignal::new();

        let trigger = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.trigger();
            }
        };

        tokio::join!(
            listener.accept_loop(&acceptor, Arc::new(NoopHandler), &cancel),
            trigger
        );

        assert_eq!(acceptor.calls.load(Ordering::SeqCst), 1);
        assert_ne!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let listener = Listener::new("127.0.0.1:0");
        listener.initialize().unwrap();
        listener.stop();
        listener.stop();
        assert_eq!(listener.state(), ListenerState::Stopped);

        let result = listener
            .run(Arc::new(NoopHandler), &ShutdownSignal::new())
            .await;
        assert!(result.is_err());
    }
}

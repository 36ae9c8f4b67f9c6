//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_tcp_session::{
    AcceptHandler, Connector, Listener, ListenerConfig, Result, Session, SessionConfig,
    SessionHandler, ShutdownSignal,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Accept handler that wraps every connection in a session
pub struct SessionAcceptor {
    handler: Arc<dyn SessionHandler>,
    config: SessionConfig,
    pub sessions: Mutex<Vec<Session>>,
    pub peers: Mutex<Vec<SocketAddr>>,
}

impl SessionAcceptor {
    pub fn new(handler: Arc<dyn SessionHandler>) -> Arc<Self> {
        Self::with_config(handler, SessionConfig::default())
    }

    pub fn with_config(handler: Arc<dyn SessionHandler>, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            handler,
            config,
            sessions: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl AcceptHandler for SessionAcceptor {
    async fn on_accept(&self, stream: tokio::net::TcpStream, peer: SocketAddr) -> Result<()> {
        let session = Session::new(Arc::clone(&self.handler), self.config.clone())?;
        session.initialize(stream)?;
        self.peers.lock().push(peer);
        self.sessions.lock().push(session);
        Ok(())
    }
}

/// Running listener plus the handles needed to stop it
pub struct TestServer {
    pub listener: Arc<Listener>,
    pub addr: SocketAddr,
    pub cancel: ShutdownSignal,
    pub task: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn shutdown(self) {
        self.cancel.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
        self.listener.stop();
    }
}

/// Bind on an ephemeral loopback port and start accepting
pub fn start_server(acceptor: Arc<dyn AcceptHandler>) -> TestServer {
    start_server_with_config(acceptor, ListenerConfig::new("127.0.0.1:0"))
}

pub fn start_server_with_config(
    acceptor: Arc<dyn AcceptHandler>,
    config: ListenerConfig,
) -> TestServer {
    let listener = Arc::new(Listener::with_config(config));
    let addr = listener.initialize().expect("Failed to initialize listener");
    let cancel = ShutdownSignal::new();

    let task = {
        let listener = Arc::clone(&listener);
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(acceptor, &cancel).await })
    };

    TestServer {
        listener,
        addr,
        cancel,
        task,
    }
}

/// Connect and wrap the stream in an initialized session
pub async fn connect_session(
    addr: SocketAddr,
    handler: Arc<dyn SessionHandler>,
    config: SessionConfig,
) -> Session {
    let stream = Connector::connect(addr, &ShutdownSignal::new())
        .await
        .expect("Failed to connect");
    let session = Session::new(handler, config).expect("Failed to create session");
    session.initialize(stream).expect("Failed to initialize session");
    session
}

/// Poll `cond` every few milliseconds until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

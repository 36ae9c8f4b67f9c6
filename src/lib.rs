//! Rust TCP Session
//!
//! An asynchronous TCP session engine: the layer between raw sockets and a
//! request/response or streaming protocol, for both client and server roles.
//!
//! ## Features
//!
//! - Sliding-window receive buffer that re-presents partially consumed data
//! - Multi-producer send queue over pooled buffers with vectored, partial-write
//!   aware transmission
//! - Single-flight receive loop and single-active-sender write path per session
//! - Exactly-once, race-free disconnect
//! - Accept loop with transient-error backoff and a give-up threshold
//! - Cancellable outbound connect
//!
//! Message framing is left to the [`SessionHandler`] supplied by the embedder.
//!
//! ## Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use rust_tcp_session::{
//!     AcceptHandler, CallbackHandler, Listener, Session, SessionConfig, ShutdownSignal,
//! };
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use tokio::net::TcpStream;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl AcceptHandler for Echo {
//!     async fn on_accept(&self, stream: TcpStream, _peer: SocketAddr) -> rust_tcp_session::Result<()> {
//!         let handler = CallbackHandler::new(|session, data| {
//!             session.write(data)?;
//!             Ok(data.len())
//!         });
//!         let session = Session::new(Arc::new(handler), SessionConfig::default())?;
//!         session.initialize(stream)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = Listener::new("127.0.0.1:20000");
//!     listener.initialize()?;
//!     listener.run(Arc::new(Echo), &ShutdownSignal::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod core;
pub mod error;
pub mod session;
pub mod stability;

// Re-export main types
pub use buffer::{
    BufferPool, BufferPoolConfig, BufferPoolStats, ByteWindow, PooledSendQueue, SharedBufferPool,
};
pub use crate::core::{
    AcceptHandler, Connector, ConnectorConfig, Listener, ListenerConfig, ListenerState,
};
pub use error::{NetworkError, Result};
pub use session::{
    CallbackHandler, DiscardHandler, Session, SessionConfig, SessionHandler, SessionState,
};
pub use stability::ShutdownSignal;

//! Error types for the session engine

use std::io;
use thiserror::Error;

/// Result type for session engine operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Session engine errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid state error
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Address parse error
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Protocol layer rejected the received bytes
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Receive window cannot make room for another read
    #[error("Receive window exhausted (capacity: {0} bytes)")]
    WindowExhausted(usize),

    /// Pending send queue would exceed its configured cap
    #[error("Send queue full: {0} bytes queued (limit: {1} bytes)")]
    SendQueueFull(usize, usize),

    /// Operation cancelled through a shutdown signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Other errors
    #[error("Network error: {0}")]
    Other(String),
}

impl NetworkError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an other error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the error came from the peer going away rather than a local fault
    #[must_use]
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

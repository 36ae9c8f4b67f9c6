//! Protocol callbacks driven by a session

use crate::error::Result;
use crate::session::Session;

/// Per-connection protocol behaviour
///
/// All three callbacks run synchronously on the session's I/O path, so they
/// must not block. They may call [`Session::write`] and
/// [`Session::disconnect`] freely.
pub trait SessionHandler: Send + Sync + 'static {
    /// Called with every unconsumed byte after each receive
    ///
    /// Returns how many bytes were consumed from the front of `data`. `Ok(0)`
    /// leaves everything in place until more bytes arrive; the same bytes are
    /// presented again with the new ones appended. An `Err`, a panic, or a
    /// count larger than `data.len()` disconnects the session.
    fn on_receive(&self, session: &Session, data: &[u8]) -> Result<usize>;

    /// Called after a whole send batch of `bytes` bytes has been transmitted
    fn on_sent(&self, _session: &Session, _bytes: usize) {}

    /// Called exactly once when the session tears down
    fn on_disconnect(&self, _session: &Session, _remote: &str) {}
}

type ReceiveFn = dyn Fn(&Session, &[u8]) -> Result<usize> + Send + Sync;
type SentFn = dyn Fn(&Session, usize) + Send + Sync;
type DisconnectFn = dyn Fn(&Session, &str) + Send + Sync;

/// [`SessionHandler`] assembled from closures
///
/// ```
/// use rust_tcp_session::CallbackHandler;
///
/// let handler = CallbackHandler::new(|session, data| {
///     session.write(data)?;
///     Ok(data.len())
/// })
/// .on_disconnect(|_, remote| println!("{remote} left"));
/// # let _ = handler;
/// ```
pub struct CallbackHandler {
    receive: Box<ReceiveFn>,
    sent: Option<Box<SentFn>>,
    disconnect: Option<Box<DisconnectFn>>,
}

impl CallbackHandler {
    /// Create a handler from its receive callback
    pub fn new<F>(on_receive: F) -> Self
    where
        F: Fn(&Session, &[u8]) -> Result<usize> + Send + Sync + 'static,
    {
        Self {
            receive: Box::new(on_receive),
            sent: None,
            disconnect: None,
        }
    }

    /// Set the send-completion callback
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn on_sent<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, usize) + Send + Sync + 'static,
    {
        self.sent = Some(Box::new(f));
        self
    }

    /// Set the disconnect callback
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &str) + Send + Sync + 'static,
    {
        self.disconnect = Some(Box::new(f));
        self
    }
}

impl SessionHandler for CallbackHandler {
    fn on_receive(&self, session: &Session, data: &[u8]) -> Result<usize> {
        (self.receive)(session, data)
    }

    fn on_sent(&self, session: &Session, bytes: usize) {
        if let Some(ref sent) = self.sent {
            sent(session, bytes);
        }
    }

    fn on_disconnect(&self, session: &Session, remote: &str) {
        if let Some(ref disconnect) = self.disconnect {
            disconnect(session, remote);
        }
    }
}

/// Handler that consumes and discards everything it receives
pub struct DiscardHandler;

impl SessionHandler for DiscardHandler {
    fn on_receive(&self, session: &Session, data: &[u8]) -> Result<usize> {
        tracing::trace!("Session {} discarded {} bytes", session.id(), data.len());
        Ok(data.len())
    }
}

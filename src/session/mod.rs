//! Session I/O engine
//!
//! A [`Session`] adopts one connected [`TcpStream`] and drives it until
//! teardown:
//!
//! - a single-flight receive loop that fills a [`ByteWindow`] and hands the
//!   unconsumed bytes to [`SessionHandler::on_receive`];
//! - a single-active-sender write path where any thread may call
//!   [`Session::write`] and the thread that wins the sending flag transmits
//!   everything queued so far;
//! - an idempotent [`Session::disconnect`] that tears the connection down
//!   exactly once no matter how many triggers race.
//!
//! All socket calls are non-blocking `try_*` operations made inside short
//! synchronous critical sections. The only suspension points are readiness
//! waits, and no lock is held across them.

mod handler;

pub use handler::{CallbackHandler, DiscardHandler, SessionHandler};

use crate::buffer::{
    BufferPool, ByteWindow, PooledSendQueue, SharedBufferPool, DEFAULT_WINDOW_CAPACITY,
};
use crate::error::{NetworkError, Result};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::Rng;
use std::io;
use std::net::Shutdown;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Generate a random session ID for log correlation
fn generate_session_id() -> u128 {
    OsRng.gen()
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receive window capacity. The window never grows; a peer that fills it
    /// without the handler consuming anything gets disconnected.
    pub recv_buffer_size: usize,
    /// Cap on bytes waiting to be sent, enforced exactly even with concurrent
    /// writers. `None` lets the queue grow without bound while the peer is
    /// slow.
    pub max_pending_send_bytes: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_WINDOW_CAPACITY,
            max_pending_send_bytes: None,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive window capacity
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Cap the bytes that may wait in the send queue
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_pending_send_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_pending_send_bytes = limit;
        self
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, never initialized
    Idle,
    /// Connected and running its I/O loops
    Active,
    /// Torn down; may be re-armed with another `initialize`
    Disconnected,
}

/// Why a session tore itself down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectReason {
    Requested,
    PeerClosed,
    ReceiveFailed,
    SendFailed,
    WindowExhausted,
    ProtocolError,
    OverConsumed,
    HandlerPanicked,
}

struct SessionInner {
    id: u128,
    config: SessionConfig,
    handler: Arc<dyn SessionHandler>,
    window: Mutex<ByteWindow>,
    send_queue: PooledSendQueue,
    disconnected: AtomicBool,
    sending: AtomicBool,
    // Bumped by every initialize so continuations from an earlier connection
    // can tell they are stale.
    generation: AtomicU64,
    init_lock: Mutex<()>,
    remote: RwLock<String>,
    writer: RwLock<Option<Arc<OwnedWriteHalf>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    runtime: RwLock<Option<Handle>>,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    created_at: Instant,
}

/// One TCP connection driven by the session engine
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session renting send buffers from the global pool
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the configured window capacity is zero.
    pub fn new(handler: Arc<dyn SessionHandler>, config: SessionConfig) -> Result<Self> {
        Self::with_pool(handler, config, SharedBufferPool::global())
    }

    /// Create a session renting send buffers from `pool`
    pub fn with_pool(
        handler: Arc<dyn SessionHandler>,
        config: SessionConfig,
        pool: Arc<dyn BufferPool>,
    ) -> Result<Self> {
        let window = ByteWindow::new(config.recv_buffer_size)?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                id: generate_session_id(),
                config,
                handler,
                window: Mutex::new(window),
                send_queue: PooledSendQueue::new(pool),
                disconnected: AtomicBool::new(true),
                sending: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                init_lock: Mutex::new(()),
                remote: RwLock::new(String::from("unknown")),
                writer: RwLock::new(None),
                recv_task: Mutex::new(None),
                runtime: RwLock::new(None),
                bytes_received: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
                created_at: Instant::now(),
            }),
        })
    }

    /// Adopt a connected stream and start receiving
    ///
    /// Must be called from inside a tokio runtime. A session can be re-armed
    /// with a new stream once the previous connection has disconnected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside a runtime or while still connected.
    pub fn initialize(&self, stream: TcpStream) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            NetworkError::invalid_state("Session::initialize must run inside a tokio runtime")
        })?;

        let _guard = self.inner.init_lock.lock();
        if !self.inner.disconnected.load(Ordering::Acquire) {
            return Err(NetworkError::invalid_state("Session is already connected"));
        }

        let remote = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| String::from("unknown"));
        let (reader, writer) = stream.into_split();

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.send_queue.clear();
        self.inner.bytes_received.store(0, Ordering::Relaxed);
        self.inner.bytes_sent.store(0, Ordering::Relaxed);
        *self.inner.remote.write() = remote;
        *self.inner.writer.write() = Some(Arc::new(writer));
        *self.inner.runtime.write() = Some(runtime.clone());
        self.inner.sending.store(false, Ordering::Release);
        self.inner.disconnected.store(false, Ordering::Release);

        let session = self.clone();
        let task = runtime.spawn(async move {
            session.receive_loop(reader, generation).await;
        });
        *self.inner.recv_task.lock() = Some(task);

        tracing::info!("Session {} connected to {}", self.id(), self.remote());
        Ok(())
    }

    /// Queue `data` for transmission
    ///
    /// Safe to call from any thread, including from inside the handler
    /// callbacks. Bytes go out in the order they were queued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once disconnected and `SendQueueFull` when a
    /// configured pending cap would be exceeded.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.inner.disconnected.load(Ordering::Acquire) {
            return Err(NetworkError::invalid_state("Session is not connected"));
        }

        if data.is_empty() {
            return Ok(());
        }

        match self.inner.config.max_pending_send_bytes {
            Some(limit) => self
                .inner
                .send_queue
                .try_enqueue(data, limit)
                .map_err(|queued| NetworkError::SendQueueFull(queued, limit))?,
            None => self.inner.send_queue.enqueue(data),
        }

        // Teardown may have cleared the queue between the check above and the
        // enqueue; nothing would ever send or release this chunk.
        if self.inner.disconnected.load(Ordering::SeqCst) {
            // Re-checked under the init lock so a concurrent re-initialize
            // never loses chunks queued for the new connection.
            let _guard = self.inner.init_lock.lock();
            if self.inner.disconnected.load(Ordering::SeqCst) {
                self.inner.send_queue.clear();
                return Err(NetworkError::invalid_state("Session is not connected"));
            }
        }

        // Pairs with the fence in `run_sender` after releasing the flag.
        fence(Ordering::SeqCst);
        if self.try_acquire_sender() {
            let generation = self.inner.generation.load(Ordering::Acquire);
            self.run_sender(generation);
        }

        Ok(())
    }

    /// Tear the connection down
    ///
    /// Idempotent and safe to call from any thread. Only the first call does
    /// the work and fires [`SessionHandler::on_disconnect`].
    pub fn disconnect(&self) {
        self.teardown(DisconnectReason::Requested);
    }

    /// Get session ID
    #[must_use]
    pub fn id(&self) -> u128 {
        self.inner.id
    }

    /// Remote peer as captured at initialization
    #[must_use]
    pub fn remote(&self) -> String {
        self.inner.remote.read().clone()
    }

    /// Get session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        if !self.inner.disconnected.load(Ordering::Acquire) {
            SessionState::Active
        } else if self.inner.generation.load(Ordering::Acquire) == 0 {
            SessionState::Idle
        } else {
            SessionState::Disconnected
        }
    }

    /// Check if session is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Bytes received on the current connection
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    /// Bytes transmitted on the current connection
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    /// Bytes queued but not yet transmitted
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.inner.send_queue.queued_bytes()
    }

    /// Get session uptime
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::Acquire) == generation
            && !self.inner.disconnected.load(Ordering::Acquire)
    }

    async fn receive_loop(self, reader: OwnedReadHalf, generation: u64) {
        self.inner.window.lock().reset();

        loop {
            if let Err(e) = reader.readable().await {
                tracing::debug!("Session {} readiness failed: {}", self.id(), e);
                self.disconnect_generation(generation, DisconnectReason::ReceiveFailed);
                return;
            }

            if !self.is_current(generation) {
                return;
            }

            if let Err(reason) = self.on_readable(&reader, generation) {
                self.disconnect_generation(generation, reason);
                return;
            }
        }
    }

    /// Pull whatever the socket has into the window and run the handler
    ///
    /// The window lock is released before the caller acts on an error, so
    /// `on_disconnect` never runs with it held by this path.
    fn on_readable(
        &self,
        reader: &OwnedReadHalf,
        generation: u64,
    ) -> std::result::Result<(), DisconnectReason> {
        let mut window = self.inner.window.lock();

        // A disconnect or re-initialize may have landed since the readiness
        // wait; the loop exits on its next check.
        if !self.is_current(generation) {
            return Ok(());
        }

        if !window.ensure_free(1) {
            tracing::warn!(
                "Session {}: {}",
                self.id(),
                NetworkError::WindowExhausted(window.capacity())
            );
            return Err(DisconnectReason::WindowExhausted);
        }

        let received = match reader.try_read(window.writable_mut()) {
            Ok(0) => return Err(DisconnectReason::PeerClosed),
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Ok(());
            }
            Err(e) => {
                let err = NetworkError::from(e);
                tracing::debug!("Session {} receive failed: {}", self.id(), err);
                return Err(if err.is_peer_closed() {
                    DisconnectReason::PeerClosed
                } else {
                    DisconnectReason::ReceiveFailed
                });
            }
        };

        if !window.on_write(received) {
            return Err(DisconnectReason::ReceiveFailed);
        }
        self.inner
            .bytes_received
            .fetch_add(received as u64, Ordering::Relaxed);

        let available = window.data_size();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.inner.handler.on_receive(self, window.readable())
        }));

        match outcome {
            Ok(Ok(consumed)) if consumed <= available => {
                window.on_read(consumed);
                Ok(())
            }
            Ok(Ok(consumed)) => {
                tracing::warn!(
                    "Session {} handler consumed {} bytes but only {} were available",
                    self.id(),
                    consumed,
                    available
                );
                Err(DisconnectReason::OverConsumed)
            }
            Ok(Err(e)) => {
                tracing::warn!("Session {} protocol error: {}", self.id(), e);
                Err(DisconnectReason::ProtocolError)
            }
            Err(_) => {
                tracing::error!("Session {} receive handler panicked", self.id());
                Err(DisconnectReason::HandlerPanicked)
            }
        }
    }

    fn try_acquire_sender(&self) -> bool {
        self.inner
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release_sender(&self) {
        self.inner.sending.store(false, Ordering::SeqCst);
    }

    /// Transmit until the queue is empty or the socket stops accepting bytes
    ///
    /// Runs only while holding the sending flag. The flag is released here
    /// when idle, handed to a readiness continuation when the socket would
    /// block, or left alone if a newer connection has replaced this one.
    fn run_sender(&self, generation: u64) {
        loop {
            if self.inner.generation.load(Ordering::Acquire) != generation {
                return;
            }

            if self.inner.disconnected.load(Ordering::Acquire) {
                // Drop anything a racing writer slipped in after teardown.
                self.inner.send_queue.clear();
                self.release_sender();
                return;
            }

            let Some(writer) = self.inner.writer.read().clone() else {
                self.release_sender();
                return;
            };

            if self.inner.send_queue.build_active_if_empty() == 0 {
                self.release_sender();
                // A write may have queued between the drain and the release.
                // The fence keeps the queue check from moving ahead of the
                // release, so either we see the chunk or its writer sees the
                // flag free.
                fence(Ordering::SeqCst);
                if self.inner.send_queue.pending_len() > 0 && self.try_acquire_sender() {
                    continue;
                }
                return;
            }

            let result = self
                .inner
                .send_queue
                .with_active_slices(|slices| writer.try_write_vectored(slices));

            match result {
                Ok(0) => {
                    tracing::debug!("Session {} transmit wrote zero bytes", self.id());
                    self.disconnect_generation(generation, DisconnectReason::SendFailed);
                    return;
                }
                Ok(n) => {
                    self.inner.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    if let Some(batch) = self.inner.send_queue.complete(n) {
                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            self.inner.handler.on_sent(self, batch);
                        }));
                        if outcome.is_err() {
                            tracing::error!("Session {} send handler panicked", self.id());
                            self.disconnect_generation(
                                generation,
                                DisconnectReason::HandlerPanicked,
                            );
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.park_sender(writer, generation);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let err = NetworkError::from(e);
                    tracing::debug!("Session {} transmit failed: {}", self.id(), err);
                    let reason = if err.is_peer_closed() {
                        DisconnectReason::PeerClosed
                    } else {
                        DisconnectReason::SendFailed
                    };
                    self.disconnect_generation(generation, reason);
                    return;
                }
            }
        }
    }

    /// Resume the sender once the socket is writable again
    ///
    /// The sending flag stays held, so concurrent writers only queue.
    fn park_sender(&self, writer: Arc<OwnedWriteHalf>, generation: u64) {
        let Some(runtime) = self.inner.runtime.read().clone() else {
            self.release_sender();
            return;
        };

        let session = self.clone();
        runtime.spawn(async move {
            let ready = writer.writable().await;
            drop(writer);

            if let Err(e) = ready {
                tracing::debug!("Session {} writability failed: {}", session.id(), e);
                session.disconnect_generation(generation, DisconnectReason::SendFailed);
                return;
            }

            session.run_sender(generation);
        });
    }

    fn disconnect_generation(&self, generation: u64, reason: DisconnectReason) {
        if self.inner.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.teardown(reason);
    }

    fn teardown(&self, reason: DisconnectReason) {
        if self.inner.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        let remote = self.remote();

        self.inner.send_queue.clear();
        self.release_sender();

        if let Some(writer) = self.inner.writer.write().take() {
            let stream: &TcpStream = (*writer).as_ref();
            // Best effort; the peer may already be gone.
            let _ = socket2::SockRef::from(stream).shutdown(Shutdown::Both);
        }

        if let Some(task) = self.inner.recv_task.lock().take() {
            task.abort();
        }

        tracing::info!(
            "Session {} disconnected from {} ({:?}, uptime: {:?})",
            self.id(),
            remote,
            reason,
            self.uptime()
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.inner.handler.on_disconnect(self, &remote);
        }));
        if outcome.is_err() {
            tracing::error!("Session {} disconnect handler panicked", self.id());
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("remote", &self.remote())
            .field("state", &self.state())
            .field("uptime", &self.uptime())
            .finish()
    }
}

//! Bounded WebSocket connection pool.
//!
//! A [`ConnectionPool`] owns a fixed-capacity slot registry and the loop
//! thread that drives every slot. Any thread may create connections and
//! send on them; all I/O happens on the loop thread.
//!
//! # Lifecycle
//!
//! The loop thread starts when the live connection count goes from 0 to 1
//! and is drained and joined when it drops back to 0. Both transitions
//! happen under one lifecycle mutex, so a connection created concurrently
//! with the last removal either lands on the old loop before its shutdown
//! or starts a new one.
//!
//! # Example
//!
//! ```ignore
//! use wspool::{ConnectionPool, ConnectionEvent, PoolConfig};
//!
//! let pool = ConnectionPool::new(PoolConfig::default());
//! let (client, mut events) = pool.connect_channel("ws://127.0.0.1:9001/echo")?;
//! client.send_text("hello")?;
//!
//! while let Some(event) = events.blocking_recv() {
//!     if let ConnectionEvent::Message { payload, .. } = event {
//!         println!("{}", String::from_utf8_lossy(&payload));
//!         break;
//!     }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Endpoint, OpCode, UpgradeRequest};
use crate::transport::{Connector, TcpConnector};

use super::event_loop::{EventLoop, PoolCommand, SlotStatus};
use super::handler::{ChannelHandler, EventReceiver, WebSocketHandler};
use super::session::{CLOSE_NORMAL, SessionState, validate_outbound};

// ============================================================================
// Lifecycle
// ============================================================================

/// State guarded by the lifecycle mutex.
#[derive(Default)]
struct Lifecycle {
    /// Sender into the running loop. `None` while stopped.
    tx: Option<mpsc::UnboundedSender<PoolCommand>>,
    /// Running loop thread.
    thread: Option<JoinHandle<()>>,
    /// Stopped loop that could not be joined from its own thread.
    retired: Option<JoinHandle<()>>,
    /// Next slot index to hand out.
    next_slot: usize,
    /// Connections created and not yet removed.
    live: usize,
}

impl Lifecycle {
    fn loop_thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|handle| handle.thread().id())
    }
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    lifecycle: Mutex<Lifecycle>,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Thread-safe pool of WebSocket connections sharing one loop thread.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool using plain TCP.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }

    /// Creates a pool that opens transports through `connector`.
    #[must_use]
    pub fn with_connector(config: PoolConfig, connector: impl Connector) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                connector: Arc::new(connector),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    // ========================================================================
    // Connection Creation
    // ========================================================================

    /// Starts connecting to `url`. Events go to `handler`.
    ///
    /// Returns once the attempt is queued; the outcome arrives through
    /// [`WebSocketHandler::on_open`] or [`WebSocketHandler::on_failed`].
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedUrl`] if `url` is not a `ws://` or `wss://` URL
    /// - [`Error::ResourceExhausted`] if the pool has handed out all slots
    pub fn connect(&self, url: &str, handler: impl WebSocketHandler) -> Result<WebSocketClient> {
        self.open(url, None, Box::new(handler))
    }

    /// Like [`connect`](Self::connect), requesting a subprotocol.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), plus [`Error::InvalidArgument`]
    /// if `protocol` contains a line break.
    pub fn connect_with_protocol(
        &self,
        url: &str,
        protocol: &str,
        handler: impl WebSocketHandler,
    ) -> Result<WebSocketClient> {
        self.open(url, Some(protocol.to_string()), Box::new(handler))
    }

    /// Connects with a [`ChannelHandler`] and returns its event receiver.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn connect_channel(&self, url: &str) -> Result<(WebSocketClient, EventReceiver)> {
        let (handler, events) = ChannelHandler::new();
        let client = self.open(url, None, Box::new(handler))?;
        Ok((client, events))
    }

    fn open(
        &self,
        url: &str,
        protocol: Option<String>,
        handler: Box<dyn WebSocketHandler>,
    ) -> Result<WebSocketClient> {
        let endpoint = Endpoint::parse_ws(url)?;
        let request = UpgradeRequest::new(endpoint, protocol)?;

        let mut lifecycle = self.inner.lifecycle.lock();

        if lifecycle.next_slot >= self.inner.config.capacity {
            warn!(capacity = self.inner.config.capacity, %url, "Connection pool exhausted");
            return Err(Error::resource_exhausted(self.inner.config.capacity));
        }

        if lifecycle.tx.is_none() {
            self.start_loop(&mut lifecycle)?;
        }

        let id = ConnectionId::from_index(lifecycle.next_slot);
        let status = Arc::new(SlotStatus::new());

        let command = PoolCommand::Open {
            id,
            request,
            handler,
            status: Arc::clone(&status),
        };
        lifecycle
            .tx
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(command)
            .map_err(|_| Error::ConnectionClosed)?;

        lifecycle.next_slot += 1;
        lifecycle.live += 1;
        debug!(%id, %url, live = lifecycle.live, "Connection created");

        Ok(WebSocketClient {
            id,
            pool: self.clone(),
            status,
        })
    }

    fn start_loop(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        if let Some(retired) = lifecycle.retired.take() {
            if retired.thread().id() == thread::current().id() {
                lifecycle.retired = Some(retired);
            } else {
                let _ = retired.join();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EventLoop::spawn(
            self.inner.config.clone(),
            Arc::clone(&self.inner.connector),
            rx,
        )?;

        lifecycle.tx = Some(tx);
        lifecycle.thread = Some(handle);
        info!(capacity = self.inner.config.capacity, "Connection pool loop started");
        Ok(())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn enqueue(&self, command: PoolCommand) -> Result<()> {
        let lifecycle = self.inner.lifecycle.lock();
        lifecycle
            .tx
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Sends a message on connection `id`.
    ///
    /// Messages sent before the handshake completes are delivered once it
    /// does.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for continuation or close opcodes, or a
    ///   ping/pong payload over 125 bytes
    /// - [`Error::UnknownConnection`] if `id` was not issued by this pool
    /// - [`Error::ConnectionClosed`] if the pool has no live connections
    pub fn send(&self, id: ConnectionId, payload: impl Into<Bytes>, opcode: OpCode) -> Result<()> {
        let payload = payload.into();
        validate_outbound(&payload, opcode)?;
        self.check_issued(id)?;
        self.enqueue(PoolCommand::Send {
            id,
            payload,
            opcode,
        })
    }

    /// Starts the close handshake on connection `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownConnection`] if `id` was not issued by this pool
    /// - [`Error::ConnectionClosed`] if the pool has no live connections
    pub fn close(&self, id: ConnectionId, code: u16, reason: &str) -> Result<()> {
        self.check_issued(id)?;
        self.enqueue(PoolCommand::Close {
            id,
            code,
            reason: reason.to_string(),
        })
    }

    fn check_issued(&self, id: ConnectionId) -> Result<()> {
        if id.index() >= self.inner.lifecycle.lock().next_slot {
            return Err(Error::unknown_connection(id));
        }
        Ok(())
    }

    /// Removes a slot, waiting for the loop unless called from it.
    fn remove(&self, id: ConnectionId) {
        let on_loop_thread;
        let mut ack_rx = None;
        let mut stopped = None;

        {
            let mut lifecycle = self.inner.lifecycle.lock();
            on_loop_thread = lifecycle.loop_thread_id() == Some(thread::current().id());

            let Some(tx) = lifecycle.tx.clone() else {
                return;
            };

            let ack = if on_loop_thread {
                None
            } else {
                let (ack_tx, rx) = std_mpsc::sync_channel(1);
                ack_rx = Some(rx);
                Some(ack_tx)
            };
            let _ = tx.send(PoolCommand::Remove { id, ack });

            lifecycle.live = lifecycle.live.saturating_sub(1);
            debug!(%id, live = lifecycle.live, "Connection removal requested");

            if lifecycle.live == 0 {
                let _ = tx.send(PoolCommand::Shutdown);
                lifecycle.tx = None;
                stopped = lifecycle.thread.take();
                if on_loop_thread {
                    lifecycle.retired = stopped.take();
                }
            }
        }

        if let Some(ack_rx) = ack_rx {
            let _ = ack_rx.recv();
        }
        if let Some(handle) = stopped {
            let _ = handle.join();
            info!("Connection pool loop stopped");
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the number of connections created and not yet removed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.inner.lifecycle.lock().live
    }

    /// Returns the number of slots handed out so far.
    #[must_use]
    pub fn slots_used(&self) -> usize {
        self.inner.lifecycle.lock().next_slot
    }

    /// Returns the configured capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Returns the pool configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns `true` while the loop thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().tx.is_some()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("ConnectionPool")
            .field("capacity", &self.inner.config.capacity)
            .field("slots_used", &lifecycle.next_slot)
            .field("live", &lifecycle.live)
            .finish()
    }
}

// ============================================================================
// WebSocketClient
// ============================================================================

/// Handle to one pooled connection.
///
/// Dropping the handle removes the connection from the pool: the loop
/// sends a best-effort close frame, drops the socket and fires no further
/// callbacks. The drop blocks until the loop has done so, unless it runs
/// on the loop thread itself (inside a handler callback), where removal is
/// deferred to the next loop iteration.
pub struct WebSocketClient {
    id: ConnectionId,
    pool: ConnectionPool,
    status: Arc<SlotStatus>,
}

impl WebSocketClient {
    /// Returns the connection's handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the last state published by the loop thread.
    ///
    /// The value may be stale by the time the caller acts on it.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// Returns `true` if the connection was open at the last snapshot.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Sends a message with the given opcode.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for continuation or close opcodes, or a
    ///   ping/pong payload over 125 bytes
    /// - [`Error::ConnectionClosed`] if the connection is closing or closed
    pub fn send(&self, payload: impl Into<Bytes>, opcode: OpCode) -> Result<()> {
        let payload = payload.into();
        validate_outbound(&payload, opcode)?;
        self.ensure_open()?;
        self.pool.enqueue(PoolCommand::Send {
            id: self.id,
            payload,
            opcode,
        })
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Bytes::copy_from_slice(text.as_bytes()), OpCode::Text)
    }

    /// Sends a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(data, OpCode::Binary)
    }

    /// Sends a ping. A missing pong within the pong timeout closes the
    /// connection with 1006.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `payload` exceeds 125 bytes
    /// - [`Error::ConnectionClosed`] if the connection is closing or closed
    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        validate_outbound(&payload, OpCode::Ping)?;
        self.ensure_open()?;
        self.pool.enqueue(PoolCommand::Ping {
            id: self.id,
            payload,
        })
    }

    /// Starts the close handshake with `code` and `reason`.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the pool loop is gone.
    pub fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.pool.close(self.id, code, reason)
    }

    /// Closes with 1000 and an empty reason.
    ///
    /// # Errors
    ///
    /// See [`close`](Self::close).
    pub fn close_normal(&self) -> Result<()> {
        self.close(CLOSE_NORMAL, "")
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            SessionState::Closing | SessionState::Closed => Err(Error::ConnectionClosed),
            _ => Ok(()),
        }
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.status.mark_removed();
        self.pool.remove(self.id);
    }
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

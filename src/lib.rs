//! wspool - pooled WebSocket and HTTP client runtime.
//!
//! This library runs many client connections on one dedicated loop thread
//! per pool, with a blocking-friendly API usable from any thread.
//!
//! # Architecture
//!
//! Each pool owns a loop thread that multiplexes every socket it drives:
//!
//! - **Caller threads**: create connections, enqueue sends, wait on replies
//! - **Loop thread**: all socket I/O, protocol state and timers
//!
//! Key design principles:
//!
//! - Protocol logic lives in pure state machines ([`websocket::Session`],
//!   [`http::Exchange`]) fed with bytes and instants
//! - Callers never touch a socket; they enqueue commands
//! - Loops start on demand and stop when they have nothing to drive
//! - Every connection attempt ends in exactly one open or failure
//!
//! # Quick Start
//!
//! ```no_run
//! use wspool::{ConnectionEvent, ConnectionPool, HttpClientPool, HttpConfig, PoolConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let pool = ConnectionPool::new(PoolConfig::default());
//!     let (client, mut events) = pool.connect_channel("ws://127.0.0.1:9001/")?;
//!     client.send_text("hello")?;
//!
//!     while let Some(event) = events.blocking_recv() {
//!         match event {
//!             ConnectionEvent::Message { payload, .. } => {
//!                 println!("{}", String::from_utf8_lossy(&payload));
//!                 break;
//!             }
//!             event if event.is_terminal() => break,
//!             _ => {}
//!         }
//!     }
//!
//!     let http = HttpClientPool::new(HttpConfig::default());
//!     let response = http.get("http://127.0.0.1:8080/")?.wait()?;
//!     println!("{}", response.status_code);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`PoolConfig`] and [`HttpConfig`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Frame codec, handshake and URL parsing |
//! | [`transport`] | Connectors and buffered sockets |
//! | [`websocket`] | Connection pool, sessions and event loop |
//! | [`http`] | HTTP client pool and request state machine |

// ============================================================================
// Modules
// ============================================================================

/// Pool and client configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// HTTP client.
pub mod http;

/// Type-safe identifiers for connections and requests.
pub mod identifiers;

/// Wire protocol.
///
/// Pure encoders and parsers, no I/O.
pub mod protocol;

/// Transport layer.
pub mod transport;

/// WebSocket client runtime.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{HttpConfig, PoolConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestId};

// Protocol types
pub use protocol::{Endpoint, OpCode};

// Transport types
pub use transport::{AsyncStream, BoxedStream, ConnectFuture, Connector, TcpConnector};

// WebSocket types
pub use websocket::{
    ChannelHandler, ConnectionEvent, ConnectionPool, EventReceiver, SessionState, WebSocketClient,
    WebSocketHandler,
};

// HTTP types
pub use http::{HttpClientPool, HttpRequest, HttpResponse, PendingReply};

//! Transport layer.
//!
//! Streams and sockets shared by the WebSocket and HTTP event loops.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  connect()   ┌───────────────┐   poll_io()   ┌────────────┐
//! │  Connector   │─────────────►│    Socket     │◄──────────────│ Event loop │
//! │ (TCP or TLS) │  BoxedStream │ in/out buffer │   IoReport    │            │
//! └──────────────┘              └───────────────┘               └────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `stream` | `AsyncStream`, `Connector` and the default `TcpConnector` |
//! | `socket` | Buffered non-blocking socket polled by the loops |

// ============================================================================
// Submodules
// ============================================================================

/// Buffered socket driven by an event loop.
pub mod socket;

/// Stream abstraction and connectors.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use socket::{IoReport, Socket};
pub use stream::{AsyncStream, BoxedStream, ConnectFuture, Connector, TcpConnector};

//! WebSocket client runtime.
//!
//! # Architecture
//!
//! ```text
//! caller threads                          loop thread (one per pool)
//! ┌──────────────────┐   PoolCommand    ┌──────────────────────────────────┐
//! │ WebSocketClient  │─────────────────►│ EventLoop                        │
//! │ ConnectionPool   │  (mpsc, FIFO)    │  ├─ Slot 0: Session + Socket     │
//! └──────────────────┘                  │  ├─ Slot 1: Session + Socket     │
//!          ▲                            │  └─ ...                          │
//!          │   WebSocketHandler calls   │                                  │
//!          └────────────────────────────┤ poll: queue, sockets, deadline   │
//!                                       └──────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `session` | Per-connection protocol state machine |
//! | `handler` | Callback trait and channel adapter |
//! | `event_loop` | Single-thread multiplexer |
//! | `pool` | Slot registry, lifecycle and client handles |

// ============================================================================
// Submodules
// ============================================================================

/// Single-thread multiplexer.
pub(crate) mod event_loop;

/// Application callbacks.
pub mod handler;

/// Connection pool and client handles.
pub mod pool;

/// Connection state machine.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::{ChannelHandler, ConnectionEvent, EventReceiver, WebSocketHandler};
pub use pool::{ConnectionPool, WebSocketClient};
pub use session::{
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NO_STATUS, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR,
    CLOSE_TOO_BIG, Session, SessionEvent, SessionState,
};

//! One-shot HTTP/1.1 client on the multiplexer pattern.
//!
//! Each request opens its own connection (`Connection: close`), follows
//! redirects, retries failed connects with backoff and settles exactly one
//! [`PendingReply`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | [`HttpRequest`] and its serialization |
//! | `response` | [`HttpResponse`] and the incremental reader |
//! | `exchange` | Per-request state machine |
//! | `backoff` | Retry delay schedule |
//! | `client_loop` | Loop thread driving all exchanges |
//! | `pool` | [`HttpClientPool`] and [`PendingReply`] |

// ============================================================================
// Submodules
// ============================================================================

/// Retry delay schedule.
pub mod backoff;

/// Loop thread.
pub(crate) mod client_loop;

/// Request state machine.
pub mod exchange;

/// Client pool and reply handles.
pub mod pool;

/// Request type.
pub mod request;

/// Response type and reader.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::backoff_delay;
pub use exchange::{Exchange, ExchangeState, Step};
pub use pool::{HttpClientPool, PendingReply};
pub use request::HttpRequest;
pub use response::HttpResponse;

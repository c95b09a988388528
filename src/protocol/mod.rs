//! Wire protocol: frames, handshake, response heads and URLs.
//!
//! Everything in this module is pure: it turns bytes into values and back
//! without touching sockets.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | RFC 6455 frame codec |
//! | `handshake` | Upgrade request and response check |
//! | `head` | HTTP/1.1 response head parsing |
//! | `url` | `ws(s)://` and `http(s)://` endpoint parsing |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket frame encode/decode.
pub mod frame;

/// WebSocket opening handshake.
pub mod handshake;

/// HTTP/1.1 response head parsing.
pub mod head;

/// Endpoint parsing.
pub mod url;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Decoded, Frame, OpCode, decode, encode, encode_with_mask};
pub use handshake::UpgradeRequest;
pub use head::ResponseHead;
pub use url::{Endpoint, SchemeFamily};

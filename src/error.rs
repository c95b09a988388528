//! Error types for the wspool runtime.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wspool::{ConnectionPool, PoolConfig, Result};
//!
//! fn example(pool: &ConnectionPool) -> Result<()> {
//!     let client = pool.connect_channel("ws://127.0.0.1:9001/chat")?.0;
//!     client.send_text("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Addressing | [`Error::MalformedUrl`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::Connect`], [`Error::HandshakeRejected`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::ProtocolViolation`] |
//! | Resources | [`Error::ResourceExhausted`], [`Error::UnknownConnection`] |
//! | Deadlines | [`Error::Timeout`], [`Error::RedirectLimitExceeded`] |
//! | External | [`Error::Io`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Addressing Errors
    // ========================================================================
    /// URL could not be parsed or uses an unsupported scheme.
    #[error("Malformed URL '{url}': {reason}")]
    MalformedUrl {
        /// The rejected URL text.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid argument passed to an API call.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// DNS, TCP or TLS connection failure.
    ///
    /// Returned when the transport cannot be established.
    #[error("Connection failed: {message}")]
    Connect {
        /// Description of the connection error.
        message: String,
    },

    /// Server answered the upgrade request with something other than 101.
    #[error("Handshake rejected: {status_line}")]
    HandshakeRejected {
        /// The status line received from the server.
        status_line: String,
    },

    /// Connection or pool is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Peer violated the wire protocol.
    ///
    /// Bad fragmentation sequencing, malformed frame headers or
    /// unparseable HTTP responses.
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Pool is at capacity.
    #[error("Resource exhausted: pool capacity of {capacity} connections reached")]
    ResourceExhausted {
        /// Configured capacity of the pool.
        capacity: usize,
    },

    /// Connection handle does not name a live slot.
    #[error("Unknown connection: {id}")]
    UnknownConnection {
        /// The stale or foreign handle.
        id: ConnectionId,
    },

    // ========================================================================
    // Deadline Errors
    // ========================================================================
    /// Operation exceeded its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many HTTP redirects.
    #[error("Redirect limit of {limit} exceeded")]
    RedirectLimitExceeded {
        /// Maximum number of redirects followed.
        limit: u32,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a malformed URL error.
    #[inline]
    pub fn malformed_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(status_line: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            status_line: status_line.into(),
        }
    }

    /// Creates a protocol violation error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates a resource exhausted error.
    #[inline]
    pub fn resource_exhausted(capacity: usize) -> Self {
        Self::ResourceExhausted { capacity }
    }

    /// Creates an unknown connection error.
    #[inline]
    pub fn unknown_connection(id: ConnectionId) -> Self {
        Self::UnknownConnection { id }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a redirect limit error.
    #[inline]
    pub fn redirect_limit(limit: u32) -> Self {
        Self::RedirectLimitExceeded { limit }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::HandshakeRejected { .. }
                | Self::ConnectionClosed
                | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connect("connection refused");
        assert_eq!(err.to_string(), "Connection failed: connection refused");
    }

    #[test]
    fn test_malformed_url_display() {
        let err = Error::malformed_url("ftp://x", "unsupported scheme 'ftp'");
        assert_eq!(
            err.to_string(),
            "Malformed URL 'ftp://x': unsupported scheme 'ftp'"
        );
    }

    #[test]
    fn test_resource_exhausted_display() {
        let err = Error::resource_exhausted(100);
        assert_eq!(
            err.to_string(),
            "Resource exhausted: pool capacity of 100 connections reached"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::timeout("handshake", 5000);
        let other_err = Error::connect("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connect("test").is_connection_error());
        assert!(Error::handshake_rejected("HTTP/1.1 403 Forbidden").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::protocol("bad opcode").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("request", 1000).is_recoverable());
        assert!(Error::connect("refused").is_recoverable());
        assert!(!Error::redirect_limit(5).is_recoverable());
        assert!(!Error::resource_exhausted(100).is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}

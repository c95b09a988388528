//! Type-safe identifiers for pooled entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time and
//! keep raw slot indices out of the public API.
//!
//! | Type | Wraps | Scope |
//! |------|-------|-------|
//! | [`ConnectionId`] | slot index | one [`ConnectionPool`](crate::ConnectionPool) |
//! | [`RequestId`] | UUID v4 | one [`HttpClientPool`](crate::HttpClientPool) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use uuid::Uuid;

// ============================================================================
// ConnectionId
// ============================================================================

/// Opaque handle for a WebSocket connection.
///
/// Valid only for the lifetime of the pool that issued it. Slots are never
/// reused, so a stale handle cannot alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// Wraps a slot index.
    #[inline]
    #[must_use]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Identifier for an in-flight HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

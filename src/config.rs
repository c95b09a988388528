//! Pool configuration.
//!
//! Type-safe settings for [`ConnectionPool`](crate::ConnectionPool) and
//! [`HttpClientPool`](crate::HttpClientPool). Both structs use builder
//! methods and deserialize from any serde format with missing fields
//! falling back to the defaults below. Durations are expressed in
//! milliseconds on the wire.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wspool::PoolConfig;
//!
//! let config = PoolConfig::new()
//!     .with_capacity(16)
//!     .with_ping_interval(Duration::from_secs(10));
//! ```
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `capacity` | 100 connections |
//! | `handshake_timeout` | 10s |
//! | `ping_interval` | 30s (zero disables keepalive) |
//! | `pong_timeout` | 30s |
//! | `close_timeout` | 5s |
//! | `max_message_size` | 64 MiB |
//! | `fragment_size` | 32 KiB |
//! | `request_timeout` | 30s |
//! | `max_redirects` | 5 |
//! | `max_retries` | 3 |
//! | `backoff_base` / `backoff_max` | 100ms / 2s |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default hard cap on connections created by one pool.
pub const DEFAULT_CAPACITY: usize = 100;

/// Outbound messages above this size are fragmented.
pub const DEFAULT_FRAGMENT_SIZE: usize = 32 * 1024;

/// Largest reassembled inbound message accepted.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default per-request deadline for HTTP.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default redirect hop limit.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

// ============================================================================
// PoolConfig
// ============================================================================

/// WebSocket pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections ever created by the pool.
    pub capacity: usize,

    /// Deadline for TCP connect plus upgrade response.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// Interval between keepalive pings. Zero disables keepalive.
    #[serde(with = "duration_ms")]
    pub ping_interval: Duration,

    /// Time allowed for a pong after a ping before the connection is dropped.
    #[serde(with = "duration_ms")]
    pub pong_timeout: Duration,

    /// Time allowed for the peer to finish the close handshake.
    #[serde(with = "duration_ms")]
    pub close_timeout: Duration,

    /// Largest inbound message accepted before closing with 1009.
    pub max_message_size: usize,

    /// Outbound fragmentation threshold.
    pub fragment_size: usize,

    /// Bytes requested per socket read.
    pub read_chunk: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            read_chunk: 16 * 1024,
        }
    }
}

impl PoolConfig {
    /// Creates a config with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection cap.
    #[inline]
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the keepalive ping interval. Zero disables keepalive.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the pong deadline.
    #[inline]
    #[must_use]
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Sets the close handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the inbound message size limit.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the outbound fragmentation threshold.
    #[inline]
    #[must_use]
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// Returns `true` if interval pings are enabled.
    #[inline]
    #[must_use]
    pub fn keepalive_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

// ============================================================================
// HttpConfig
// ============================================================================

/// HTTP client pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Deadline measured from submission, covering retries and redirects.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Maximum redirects followed per request.
    pub max_redirects: u32,

    /// Maximum reconnect attempts after a connect failure.
    pub max_retries: u32,

    /// First retry delay.
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,

    /// Ceiling on the retry delay.
    #[serde(with = "duration_ms")]
    pub backoff_max: Duration,

    /// Sent as `User-Agent` unless the request sets its own.
    pub user_agent: String,

    /// Bytes requested per socket read.
    pub read_chunk: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            user_agent: concat!("wspool/", env!("CARGO_PKG_VERSION")).to_string(),
            read_chunk: 16 * 1024,
        }
    }
}

impl HttpConfig {
    /// Creates a config with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-request deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the redirect hop limit.
    #[inline]
    #[must_use]
    pub fn with_max_redirects(mut self, limit: u32) -> Self {
        self.max_redirects = limit;
        self
    }

    /// Sets the connect retry limit.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry backoff range.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max.max(base);
        self
    }

    /// Sets the default `User-Agent`.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// (De)serializes a [`Duration`] as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================

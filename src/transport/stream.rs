//! Byte streams and the connectors that open them.
//!
//! The event loops never name a concrete socket type. They ask a
//! [`Connector`] for a boxed [`AsyncStream`] and drive it through
//! `AsyncRead`/`AsyncWrite`, which lets callers supply TLS or in-memory
//! transports without touching the state machines.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{Error as IoError, ErrorKind};

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

use crate::protocol::Endpoint;

// ============================================================================
// Types
// ============================================================================

/// Any bidirectional byte stream the event loops can drive.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased stream owned by a socket.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Future resolving to an established stream.
pub type ConnectFuture = BoxFuture<'static, std::io::Result<BoxedStream>>;

// ============================================================================
// Connector
// ============================================================================

/// Opens transport streams to endpoints.
///
/// Implementations must not block: the returned future is polled on the
/// pool's loop thread alongside every other connection.
pub trait Connector: Send + Sync + 'static {
    /// Starts connecting to `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> ConnectFuture;
}

impl fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connector")
    }
}

// ============================================================================
// TcpConnector
// ============================================================================

/// Plain TCP connector with `TCP_NODELAY` set.
///
/// Secure endpoints fail with [`ErrorKind::Unsupported`]; install a
/// TLS-capable [`Connector`] to reach `wss://` or `https://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> ConnectFuture {
        if endpoint.secure {
            return future::ready(Err(IoError::new(
                ErrorKind::Unsupported,
                format!(
                    "TLS transport not configured for {}:{}",
                    endpoint.host, endpoint.port
                ),
            )))
            .boxed();
        }

        let host = endpoint.host.clone();
        let port = endpoint.port;

        async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true)?;
            trace!(%host, port, "TCP connected");
            Ok(Box::new(stream) as BoxedStream)
        }
        .boxed()
    }
}

// ============================================================================
// Tests
// ============================================================================

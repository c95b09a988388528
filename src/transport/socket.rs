//! Non-blocking socket driven by an event loop.
//!
//! A [`Socket`] owns one transport stream through its whole life:
//! connecting, open, closed. Each call to [`Socket::poll_io`] makes as much
//! progress as the stream allows without blocking and reports what
//! happened, leaving protocol decisions to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::io::{Error as IoError, ErrorKind};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::stream::{BoxedStream, ConnectFuture};

// ============================================================================
// Constants
// ============================================================================

/// Reads per `poll_io` call before yielding to other sockets.
const READS_PER_POLL: usize = 4;

// ============================================================================
// IoReport
// ============================================================================

/// Outcome of one [`Socket::poll_io`] pass.
#[derive(Debug, Default)]
pub struct IoReport {
    /// The connect future completed successfully during this pass.
    pub connected: bool,
    /// Bytes appended to the inbound buffer.
    pub read: usize,
    /// Bytes flushed from the outbound buffer.
    pub written: usize,
    /// Peer closed its write side.
    pub eof: bool,
    /// Connect or I/O failure. The socket is closed when this is set.
    pub error: Option<IoError>,
}

impl IoReport {
    /// Returns `true` if nothing happened.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.connected && self.read == 0 && self.written == 0 && !self.eof && self.error.is_none()
    }
}

// ============================================================================
// Socket
// ============================================================================

enum Link {
    Connecting(ConnectFuture),
    Open(BoxedStream),
    Closed,
}

/// One transport connection with buffered input and output.
pub struct Socket {
    link: Link,
    outbound: BytesMut,
    inbound: BytesMut,
    scratch: Box<[u8]>,
    shutdown_requested: bool,
    write_closed: bool,
    read_closed: bool,
}

impl Socket {
    /// Wraps a pending connect.
    #[must_use]
    pub fn connecting(connect: ConnectFuture, read_chunk: usize) -> Self {
        Self {
            link: Link::Connecting(connect),
            outbound: BytesMut::new(),
            inbound: BytesMut::new(),
            scratch: vec![0u8; read_chunk.max(1)].into_boxed_slice(),
            shutdown_requested: false,
            write_closed: false,
            read_closed: false,
        }
    }

    /// Returns `true` while the connect future is pending.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self.link, Link::Connecting(_))
    }

    /// Returns `true` once the stream has been dropped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.link, Link::Closed)
    }

    /// Appends bytes to the outbound buffer.
    pub fn queue(&mut self, bytes: &[u8]) {
        if !self.is_closed() {
            self.outbound.extend_from_slice(bytes);
        }
    }

    /// Returns `true` if queued bytes have not been written yet.
    #[inline]
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Takes everything read since the last call.
    pub fn take_inbound(&mut self) -> BytesMut {
        self.inbound.split()
    }

    /// Shuts down the write half once the outbound buffer drains.
    pub fn shutdown_write(&mut self) {
        self.shutdown_requested = true;
    }

    /// Drops the stream. Unflushed output is discarded.
    pub fn close(&mut self) {
        self.link = Link::Closed;
        self.outbound.clear();
    }

    /// Writes what can be written right now, then closes.
    ///
    /// Used when a connection is removed outside the loop's normal
    /// readiness pass.
    pub fn flush_and_close(&mut self) {
        let mut cx = Context::from_waker(Waker::noop());
        let mut report = IoReport::default();
        self.poll_flush(&mut cx, &mut report);
        self.close();
    }

    /// Drives the socket: completes the connect, flushes output, then reads.
    ///
    /// Registers `cx` for every direction still pending.
    pub fn poll_io(&mut self, cx: &mut Context<'_>) -> IoReport {
        let mut report = IoReport::default();

        if let Link::Connecting(connect) = &mut self.link {
            match connect.as_mut().poll(cx) {
                Poll::Ready(Ok(stream)) => {
                    self.link = Link::Open(stream);
                    report.connected = true;
                }
                Poll::Ready(Err(e)) => {
                    self.link = Link::Closed;
                    report.error = Some(e);
                    return report;
                }
                Poll::Pending => return report,
            }
        }

        if !self.poll_flush(cx, &mut report) {
            return report;
        }
        self.poll_fill(cx, &mut report);
        report
    }

    /// Returns `false` if the socket failed.
    fn poll_flush(&mut self, cx: &mut Context<'_>, report: &mut IoReport) -> bool {
        let Link::Open(stream) = &mut self.link else {
            return true;
        };

        while !self.outbound.is_empty() {
            match Pin::new(&mut *stream).poll_write(cx, &self.outbound) {
                Poll::Ready(Ok(0)) => {
                    report.error = Some(ErrorKind::WriteZero.into());
                    self.link = Link::Closed;
                    return false;
                }
                Poll::Ready(Ok(n)) => {
                    self.outbound.advance(n);
                    report.written += n;
                }
                Poll::Ready(Err(e)) => {
                    report.error = Some(e);
                    self.link = Link::Closed;
                    return false;
                }
                Poll::Pending => return true,
            }
        }

        if self.shutdown_requested && !self.write_closed {
            match Pin::new(&mut *stream).poll_shutdown(cx) {
                Poll::Ready(Ok(())) => self.write_closed = true,
                Poll::Ready(Err(e)) => {
                    report.error = Some(e);
                    self.link = Link::Closed;
                    return false;
                }
                Poll::Pending => {}
            }
        }
        true
    }

    fn poll_fill(&mut self, cx: &mut Context<'_>, report: &mut IoReport) {
        let Link::Open(stream) = &mut self.link else {
            return;
        };
        if self.read_closed {
            return;
        }

        for _ in 0..READS_PER_POLL {
            let mut buf = ReadBuf::new(&mut self.scratch);
            match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
                Poll::Ready(Ok(())) => {
                    let filled = buf.filled();
                    if filled.is_empty() {
                        self.read_closed = true;
                        report.eof = true;
                        return;
                    }
                    self.inbound.extend_from_slice(filled);
                    report.read += filled.len();
                }
                Poll::Ready(Err(e)) => {
                    report.error = Some(e);
                    self.link = Link::Closed;
                    return;
                }
                Poll::Pending => return,
            }
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.link {
            Link::Connecting(_) => "connecting",
            Link::Open(_) => "open",
            Link::Closed => "closed",
        };
        f.debug_struct("Socket")
            .field("state", &state)
            .field("outbound", &self.outbound.len())
            .field("inbound", &self.inbound.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::poll_fn;

    use futures_util::FutureExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn ready_socket(stream: BoxedStream) -> Socket {
        Socket::connecting(async move { Ok::<_, IoError>(stream) }.boxed(), 64)
    }

    #[tokio::test]
    async fn test_connect_write_read() {
        let (client, mut server) = duplex(1024);
        let mut socket = ready_socket(Box::new(client));
        socket.queue(b"hello");

        let report = poll_fn(|cx| Poll::Ready(socket.poll_io(cx))).await;
        assert!(report.connected);
        assert_eq!(report.written, 5);

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.write_all(b"world").await.unwrap();
        let report = poll_fn(|cx| Poll::Ready(socket.poll_io(cx))).await;
        assert_eq!(report.read, 5);
        assert_eq!(&socket.take_inbound()[..], b"world");
    }

    #[tokio::test]
    async fn test_eof_reported() {
        let (client, server) = duplex(64);
        let mut socket = ready_socket(Box::new(client));
        drop(server);

        let report = poll_fn(|cx| Poll::Ready(socket.poll_io(cx))).await;
        assert!(report.eof || report.error.is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_closes() {
        let mut socket = Socket::connecting(
            async { Err::<BoxedStream, _>(IoError::new(ErrorKind::ConnectionRefused, "refused")) }
                .boxed(),
            64,
        );
        assert!(socket.is_connecting());

        let report = poll_fn(|cx| Poll::Ready(socket.poll_io(cx))).await;
        assert_eq!(report.error.unwrap().kind(), ErrorKind::ConnectionRefused);
        assert!(socket.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_write_after_flush() {
        let (client, mut server) = duplex(64);
        let mut socket = ready_socket(Box::new(client));
        socket.queue(b"GET");
        socket.shutdown_write();

        let _ = poll_fn(|cx| Poll::Ready(socket.poll_io(cx))).await;

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"GET");
    }

    #[test]
    fn test_idle_report() {
        assert!(IoReport::default().is_idle());
        let report = IoReport {
            read: 1,
            ..IoReport::default()
        };
        assert!(!report.is_idle());
    }
}

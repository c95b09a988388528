//! HTTP client pool and reply handles.
//!
//! An [`HttpClientPool`] runs any number of concurrent one-shot requests on
//! a single loop thread. The thread starts with the first request, exits on
//! its own once nothing is in flight, and starts again on the next request.
//!
//! # Example
//!
//! ```ignore
//! use wspool::{HttpClientPool, HttpConfig};
//!
//! let pool = HttpClientPool::new(HttpConfig::default());
//! let response = pool.get("http://127.0.0.1:8080/status")?.wait()?;
//! println!("{} {}", response.status_code, response.text());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::transport::{Connector, TcpConnector};

use super::client_loop::{ClientLoop, Submission};
use super::exchange::Exchange;
use super::request::HttpRequest;
use super::response::HttpResponse;

// ============================================================================
// Shared State
// ============================================================================

#[derive(Default)]
pub(crate) struct HttpLifecycle {
    /// Sender into the running loop. `None` while stopped.
    pub(crate) tx: Option<mpsc::UnboundedSender<Submission>>,
    /// Current or last loop thread.
    thread: Option<JoinHandle<()>>,
}

/// State shared between the pool handle and its loop thread.
pub(crate) struct HttpShared {
    pub(crate) config: HttpConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) lifecycle: Mutex<HttpLifecycle>,
    /// Requests submitted and not yet settled.
    pub(crate) pending: AtomicUsize,
}

// ============================================================================
// HttpClientPool
// ============================================================================

/// Runs HTTP requests on a self-managing loop thread.
///
/// Dropping the pool fails every in-flight request with
/// [`Error::ConnectionClosed`] and joins the thread.
pub struct HttpClientPool {
    shared: Arc<HttpShared>,
}

impl HttpClientPool {
    /// Creates a pool using plain TCP.
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }

    /// Creates a pool that opens transports through `connector`.
    #[must_use]
    pub fn with_connector(config: HttpConfig, connector: impl Connector) -> Self {
        Self {
            shared: Arc::new(HttpShared {
                config,
                connector: Arc::new(connector),
                lifecycle: Mutex::new(HttpLifecycle::default()),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Submits `request`. The deadline starts now.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedUrl`] if the request URL has no usable endpoint
    /// - [`Error::InvalidArgument`] if a header contains a line break
    /// - [`Error::Io`] if the loop thread cannot be started
    pub fn request(&self, request: HttpRequest) -> Result<PendingReply> {
        let exchange = Exchange::new(request, self.shared.config.clone(), Instant::now())?;
        let id = RequestId::generate();
        let (reply, rx) = oneshot::channel();

        debug!(request_id = %id, url = %exchange.url(), "HTTP request submitted");
        self.submit(Submission {
            id,
            exchange,
            reply,
        })?;
        Ok(PendingReply { id, rx })
    }

    /// Submits a `GET` for `url`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub fn get(&self, url: &str) -> Result<PendingReply> {
        self.request(HttpRequest::get(url)?)
    }

    /// Submits a `POST` of `body` to `url`, with `content_type` if given.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub fn post(
        &self,
        url: &str,
        body: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> Result<PendingReply> {
        let mut request = HttpRequest::post(url, body)?;
        if let Some(content_type) = content_type {
            request = request.with_content_type(content_type)?;
        }
        self.request(request)
    }

    fn submit(&self, submission: Submission) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle.lock();

        let submission = match lifecycle.tx.as_ref() {
            Some(tx) => match tx.send(submission) {
                Ok(()) => {
                    self.shared.pending.fetch_add(1, Ordering::AcqRel);
                    return Ok(());
                }
                Err(SendError(submission)) => {
                    warn!("HTTP loop gone, restarting");
                    lifecycle.tx = None;
                    submission
                }
            },
            None => submission,
        };

        if let Some(previous) = lifecycle.thread.take() {
            // The previous loop cleared `tx` on its way out and no longer
            // needs the lifecycle lock.
            if previous.join().is_err() {
                warn!("HTTP loop thread panicked");
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ClientLoop::spawn(Arc::clone(&self.shared), rx)?;
        lifecycle.thread = Some(handle);

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(submission).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::ConnectionClosed);
        }
        lifecycle.tx = Some(tx);
        debug!("HTTP loop started");
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the number of submitted requests not yet settled.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Returns `true` while a loop thread accepts requests.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.lock().tx.is_some()
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.shared.config
    }
}

impl Drop for HttpClientPool {
    fn drop(&mut self) {
        let (tx, thread) = {
            let mut lifecycle = self.shared.lifecycle.lock();
            (lifecycle.tx.take(), lifecycle.thread.take())
        };
        drop(tx);

        if let Some(thread) = thread
            && thread.join().is_err()
        {
            warn!("HTTP loop thread panicked");
        }
    }
}

impl std::fmt::Debug for HttpClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientPool")
            .field("pending", &self.pending_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PendingReply
// ============================================================================

/// Single-settlement handle to a request's outcome.
///
/// Settle it by blocking ([`wait`](Self::wait),
/// [`wait_timeout`](Self::wait_timeout)) or by awaiting it. Dropping it
/// cancels the request.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    rx: oneshot::Receiver<Result<HttpResponse>>,
}

impl PendingReply {
    /// Returns the request ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Blocks until the request settles.
    ///
    /// Must not be called from inside an async runtime; await the reply
    /// there instead.
    ///
    /// # Errors
    ///
    /// The request's failure, or [`Error::ChannelClosed`] if the loop
    /// vanished without settling it.
    pub fn wait(self) -> Result<HttpResponse> {
        self.rx.blocking_recv()?
    }

    /// Blocks until the request settles or `timeout` elapses.
    ///
    /// On timeout the request is cancelled. Must not be called from inside
    /// an async runtime; wrap the awaited reply in
    /// [`tokio::time::timeout`] there instead.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `timeout` elapses first
    /// - [`Error::Io`] if the wait runtime cannot be built
    /// - otherwise as [`wait`](Self::wait)
    pub fn wait_timeout(self, timeout: Duration) -> Result<HttpResponse> {
        let id = self.id;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        match runtime.block_on(tokio::time::timeout(timeout, self.rx)) {
            Ok(received) => received?,
            Err(_elapsed) => Err(Error::timeout(
                format!("wait for request {id}"),
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

impl Future for PendingReply {
    type Output = Result<HttpResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|e| Err(e.into())))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn quick_config() -> HttpConfig {
        HttpConfig::default()
            .with_max_retries(1)
            .with_backoff(Duration::from_millis(5), Duration::from_millis(10))
            .with_request_timeout(Duration::from_secs(5))
    }

    fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Serves one canned response per accepted connection.
    fn canned_server(response: &'static [u8], connections: usize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for _ in 0..connections {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    if stream.read(&mut byte).unwrap_or(0) == 0 {
                        break;
                    }
                    head.push(byte[0]);
                }
                let _ = stream.write_all(response);
            }
        });
        port
    }

    fn wait_until_idle(pool: &HttpClientPool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !pool.is_running() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_get_and_idle_exit() {
        let port = canned_server(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npong", 2);
        let pool = HttpClientPool::new(quick_config());

        let response = pool
            .get(&format!("http://127.0.0.1:{port}/ping"))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(response.text(), "pong");
        assert_eq!(pool.pending_count(), 0);
        assert!(wait_until_idle(&pool));

        // Lazily restarts.
        let response = pool
            .get(&format!("http://127.0.0.1:{port}/ping"))
            .unwrap()
            .wait_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.status_code, 200);
    }

    #[test]
    fn test_refused_connect_settles_after_retries() {
        let pool = HttpClientPool::new(quick_config());
        let reply = pool
            .get(&format!("http://127.0.0.1:{}/", dead_port()))
            .unwrap();
        assert!(matches!(reply.wait(), Err(Error::Connect { .. })));
    }

    #[test]
    fn test_malformed_url_is_synchronous() {
        let pool = HttpClientPool::new(quick_config());
        assert!(matches!(pool.get("ftp://x/"), Err(Error::MalformedUrl { .. })));
        assert!(!pool.is_running());
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn test_drop_fails_in_flight() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let pool = HttpClientPool::new(quick_config());
        let reply = pool.get(&format!("http://127.0.0.1:{port}/")).unwrap();
        let (_held, _) = listener.accept().unwrap();
        assert_eq!(pool.pending_count(), 1);

        drop(pool);
        assert!(matches!(reply.wait(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let pool = HttpClientPool::new(quick_config());
        let reply = pool.get(&format!("http://127.0.0.1:{port}/")).unwrap();
        let started = Instant::now();
        let result = reply.wait_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(ref e) if e.is_timeout()));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));

        // The cancelled request leaves the loop.
        assert!(wait_until_idle(&pool));
        assert_eq!(pool.pending_count(), 0);
        drop(listener);
    }

    #[test]
    fn test_wait_timeout_sees_pool_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let pool = HttpClientPool::new(quick_config());
        let reply = pool.get(&format!("http://127.0.0.1:{port}/")).unwrap();
        let (_held, _) = listener.accept().unwrap();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(pool);
        });

        let started = Instant::now();
        let result = reply.wait_timeout(Duration::from_secs(5));
        assert!(matches!(result, Err(Error::ConnectionClosed)), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_reply_is_awaitable() {
        let port = canned_server(b"HTTP/1.1 204 No Content\r\n\r\n", 1);
        let pool = HttpClientPool::new(quick_config());
        let response = pool
            .get(&format!("http://127.0.0.1:{port}/"))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(response.status_code, 204);
    }
}

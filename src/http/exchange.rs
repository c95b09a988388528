//! One HTTP request from first connect to settled reply.
//!
//! An [`Exchange`] is a pure state machine like the WebSocket session: the
//! client loop feeds it transport events and acts on the returned
//! [`Step`].
//!
//! ```text
//! CONNECTING ──connected──► REQUEST_SENT ──bytes──► READING ──complete──► DONE
//!     ▲  │                                              │
//!     │  └─ connect error: retry with backoff           │
//!     └──────────────── 3xx + Location ─────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Instant;

use bytes::BytesMut;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::protocol::{Endpoint, SchemeFamily};

use super::backoff::backoff_delay;
use super::request::HttpRequest;
use super::response::{HttpResponse, ResponseReader};

// ============================================================================
// Types
// ============================================================================

/// Exchange lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Waiting for a transport, possibly after a backoff delay.
    Connecting,
    /// Request queued on the transport.
    RequestSent,
    /// Response bytes arriving.
    Reading,
    /// Settled.
    Done,
}

/// What the loop must do next.
#[derive(Debug)]
pub enum Step {
    /// Keep polling the current transport.
    Continue,
    /// Drop the current transport and connect again once
    /// [`Exchange::ready_to_connect`] says so.
    Reconnect,
    /// Settle the reply and forget the exchange.
    Settle(Result<HttpResponse>),
}

// ============================================================================
// Exchange
// ============================================================================

/// State of one in-flight request.
#[derive(Debug)]
pub struct Exchange {
    request: HttpRequest,
    config: HttpConfig,
    url: Url,
    endpoint: Endpoint,
    state: ExchangeState,
    reader: ResponseReader,
    outbound: BytesMut,
    started: Instant,
    retry_at: Option<Instant>,
    retries: u32,
    redirects: u32,
    attempts: u32,
}

impl Exchange {
    /// Creates an exchange; the deadline runs from `now`.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedUrl`] if the request URL is not `http(s)://`
    /// - [`Error::InvalidArgument`] if a header would break the request head
    pub fn new(request: HttpRequest, config: HttpConfig, now: Instant) -> Result<Self> {
        let endpoint = Endpoint::from_url(&request.url, SchemeFamily::Http)?;
        request.check_headers()?;
        Ok(Self {
            url: request.url.clone(),
            reader: ResponseReader::new(request.expects_no_body()),
            request,
            config,
            endpoint,
            state: ExchangeState::Connecting,
            outbound: BytesMut::new(),
            started: now,
            retry_at: None,
            retries: 0,
            redirects: 0,
            attempts: 0,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Returns the endpoint of the current hop.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the URL of the current hop.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the number of transports opened so far.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the number of redirects followed.
    #[inline]
    #[must_use]
    pub fn redirects(&self) -> u32 {
        self.redirects
    }

    /// Takes the bytes to be written to the transport.
    pub fn take_outbound(&mut self) -> BytesMut {
        self.outbound.split()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Returns `true` if a transport should be opened now.
    #[must_use]
    pub fn ready_to_connect(&self, now: Instant) -> bool {
        self.state == ExchangeState::Connecting && self.retry_at.is_none_or(|at| now >= at)
    }

    /// Records that a transport is being opened.
    pub fn on_connect_started(&mut self) {
        self.retry_at = None;
        self.attempts += 1;
    }

    /// Returns the next instant at which [`check_deadline`](Self::check_deadline)
    /// or [`ready_to_connect`](Self::ready_to_connect) changes.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state == ExchangeState::Done {
            return None;
        }
        let deadline = self.started + self.config.request_timeout;
        Some(self.retry_at.map_or(deadline, |at| at.min(deadline)))
    }

    /// Settles with a timeout once the request deadline has passed.
    pub fn check_deadline(&mut self, now: Instant) -> Option<Step> {
        if self.state == ExchangeState::Done || now < self.started + self.config.request_timeout {
            return None;
        }
        debug!(url = %self.url, "HTTP request timed out");
        Some(self.settle(Err(Error::timeout(
            format!("{} {}", self.request.method, self.url),
            u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX),
        ))))
    }

    // ========================================================================
    // Transport Events
    // ========================================================================

    /// The transport connected: write the request and half-close.
    pub fn on_connected(&mut self) {
        if self.state != ExchangeState::Connecting {
            return;
        }
        self.request
            .write_into(&self.endpoint, &self.config.user_agent, &mut self.outbound);
        self.state = ExchangeState::RequestSent;
    }

    /// The transport could not be established.
    ///
    /// An [`ErrorKind::Unsupported`](std::io::ErrorKind::Unsupported) failure,
    /// such as a secure URL on a plain connector, settles without retrying.
    pub fn on_connect_failed(&mut self, error: &std::io::Error, now: Instant) -> Step {
        if error.kind() == std::io::ErrorKind::Unsupported {
            warn!(url = %self.url, error = %error, "HTTP connect unsupported");
            return self.settle(Err(Error::connect(error.to_string())));
        }
        if self.retries >= self.config.max_retries {
            warn!(url = %self.url, error = %error, attempts = self.attempts, "HTTP connect failed");
            return self.settle(Err(Error::connect(error.to_string())));
        }

        self.retries += 1;
        let delay = backoff_delay(self.retries, self.config.backoff_base, self.config.backoff_max);
        debug!(
            url = %self.url,
            error = %error,
            retry = self.retries,
            delay_ms = delay.as_millis() as u64,
            "HTTP connect failed, retrying"
        );
        self.retry_at = Some(now + delay);
        self.state = ExchangeState::Connecting;
        Step::Reconnect
    }

    /// Response bytes arrived.
    pub fn on_data(&mut self, data: &[u8]) -> Step {
        if self.state == ExchangeState::Done {
            return Step::Continue;
        }
        self.state = ExchangeState::Reading;
        match self.reader.feed(data) {
            Ok(Some(response)) => self.complete(response),
            Ok(None) => Step::Continue,
            Err(e) => self.settle(Err(e)),
        }
    }

    /// The server closed the stream.
    pub fn on_eof(&mut self) -> Step {
        if self.state == ExchangeState::Done {
            return Step::Continue;
        }
        match self.reader.finish() {
            Ok(response) => self.complete(response),
            Err(e) => self.settle(Err(e)),
        }
    }

    /// The transport failed after connecting.
    pub fn on_io_error(&mut self, error: std::io::Error) -> Step {
        if self.state == ExchangeState::Done {
            return Step::Continue;
        }
        // A reset after the full body is still a complete response.
        if self.reader.has_data()
            && let Ok(response) = self.reader.finish()
        {
            return self.complete(response);
        }
        self.settle(Err(Error::Io(error)))
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn complete(&mut self, response: HttpResponse) -> Step {
        if !response.is_redirect() {
            return self.settle(Ok(response));
        }
        let Some(location) = response.header("Location") else {
            return self.settle(Ok(response));
        };

        if self.redirects >= self.config.max_redirects {
            warn!(url = %self.url, limit = self.config.max_redirects, "Redirect limit exceeded");
            return self.settle(Err(Error::redirect_limit(self.config.max_redirects)));
        }

        let next = match self.url.join(location) {
            Ok(url) => url,
            Err(e) => return self.settle(Err(Error::malformed_url(location, e.to_string()))),
        };
        let endpoint = match Endpoint::from_url(&next, SchemeFamily::Http) {
            Ok(endpoint) => endpoint,
            Err(e) => return self.settle(Err(e)),
        };

        debug!(
            from = %self.url,
            to = %next,
            status = response.status_code,
            "Following redirect"
        );
        self.redirects += 1;
        self.url = next;
        self.endpoint = endpoint;
        self.reader = ResponseReader::new(self.request.expects_no_body());
        self.outbound.clear();
        self.retries = 0;
        self.retry_at = None;
        self.state = ExchangeState::Connecting;
        Step::Reconnect
    }

    fn settle(&mut self, result: Result<HttpResponse>) -> Step {
        self.state = ExchangeState::Done;
        self.retry_at = None;
        Step::Settle(result)
    }
}

// ============================================================================
// Tests
// ============================================================================

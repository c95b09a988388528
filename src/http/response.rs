//! HTTP response and its incremental parser.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::head::{MAX_HEAD_LEN, ResponseHead, find_head_end};

// ============================================================================
// HttpResponse
// ============================================================================

/// A complete HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code, e.g. 200.
    pub status_code: u16,
    /// Reason phrase.
    pub status_message: String,
    /// Headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    fn from_head(head: ResponseHead, body: Bytes) -> Self {
        Self {
            status_code: head.status_code,
            status_message: head.status_message,
            headers: head.headers,
            body,
        }
    }

    /// Returns the first header value with a case-insensitive name match.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` for 2xx.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Returns `true` for 3xx.
    #[inline]
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ============================================================================
// ResponseReader
// ============================================================================

/// Accumulates response bytes until a full response is available.
///
/// The body ends at `Content-Length` when declared, otherwise at end of
/// stream.
#[derive(Debug, Default)]
pub(crate) struct ResponseReader {
    buf: BytesMut,
    head: Option<(ResponseHead, usize)>,
    no_body: bool,
}

impl ResponseReader {
    /// Creates a reader. `no_body` is set for `HEAD` requests.
    pub(crate) fn new(no_body: bool) -> Self {
        Self {
            no_body,
            ..Self::default()
        }
    }

    /// Returns `true` once any byte has arrived.
    pub(crate) fn has_data(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Appends bytes; returns the response if it is now complete.
    pub(crate) fn feed(&mut self, data: &[u8]) -> Result<Option<HttpResponse>> {
        self.buf.extend_from_slice(data);

        if self.head.is_none() {
            let Some(head_len) = find_head_end(&self.buf) else {
                if self.buf.len() > MAX_HEAD_LEN {
                    return Err(Error::protocol("response head too large"));
                }
                return Ok(None);
            };
            let head = ResponseHead::parse(&self.buf[..head_len])?;
            self.head = Some((head, head_len));
        }

        let Some((head, head_len)) = &self.head else {
            return Ok(None);
        };
        let head_len = *head_len;
        let body_len = self.buf.len() - head_len;

        let expected = if self.no_body || has_no_body(head.status_code) {
            Some(0)
        } else {
            head.content_length()
        };

        match expected {
            Some(len) if body_len >= len => match self.head.take() {
                Some((head, _)) => Ok(Some(self.build(head, head_len, len))),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// The stream ended; returns whatever response was received.
    pub(crate) fn finish(&mut self) -> Result<HttpResponse> {
        let Some((head, head_len)) = self.head.take() else {
            return Err(if self.buf.is_empty() {
                Error::ConnectionClosed
            } else {
                Error::protocol("stream ended inside the response head")
            });
        };

        let body_len = self.buf.len() - head_len;
        if let Some(declared) = head.content_length()
            && body_len < declared
            && !self.no_body
        {
            return Err(Error::protocol(format!(
                "body truncated at {body_len} of {declared} bytes"
            )));
        }
        Ok(self.build(head, head_len, body_len))
    }

    fn build(&mut self, head: ResponseHead, head_len: usize, body_len: usize) -> HttpResponse {
        let mut body = self.buf.split_off(head_len);
        body.truncate(body_len);
        self.buf.clear();
        HttpResponse::from_head(head, body.freeze())
    }
}

fn has_no_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

// ============================================================================
// Tests
// ============================================================================

//! HTTP request description.

// ============================================================================
// Imports
// ============================================================================

use bytes::{BufMut, Bytes, BytesMut};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Endpoint;
use crate::protocol::head::validate_header;

// ============================================================================
// HttpRequest
// ============================================================================

/// A one-shot HTTP/1.1 request.
///
/// The client adds `Host`, `Connection: close`, `Content-Length` for
/// non-empty bodies and a default `User-Agent` unless the request sets one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Target URL.
    pub url: Url,
    /// Extra headers in send order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl HttpRequest {
    /// Creates a request with no headers and an empty body.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedUrl`] unless `url` is an `http://` or `https://`
    /// URL with a host.
    pub fn new(method: impl Into<String>, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::malformed_url(url, e.to_string()))?;
        Endpoint::from_url(&parsed, crate::protocol::SchemeFamily::Http)?;

        let method = method.into();
        if method.is_empty() || method.bytes().any(|b| !b.is_ascii_alphabetic()) {
            return Err(Error::invalid_argument(format!("invalid method '{method}'")));
        }

        Ok(Self {
            method: method.to_ascii_uppercase(),
            url: parsed,
            headers: Vec::new(),
            body: Bytes::new(),
        })
    }

    /// Creates a `GET` request.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn get(url: &str) -> Result<Self> {
        Self::new("GET", url)
    }

    /// Creates a `POST` request with `body`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new("POST", url)?.with_body(body))
    }

    /// Appends a header.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the name is not a token or the value
    /// contains a line break.
    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let (name, value) = (name.into(), value.into());
        validate_header(&name, &value)?;
        self.headers.push((name, value));
        Ok(self)
    }

    /// Sets `Content-Type`.
    ///
    /// # Errors
    ///
    /// See [`with_header`](Self::with_header).
    pub fn with_content_type(self, content_type: impl Into<String>) -> Result<Self> {
        self.with_header("Content-Type", content_type)
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first header value with a case-insensitive name match.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if the response to this request never has a body.
    #[inline]
    #[must_use]
    pub fn expects_no_body(&self) -> bool {
        self.method == "HEAD"
    }

    /// Checks every header, including ones pushed onto [`headers`](Self::headers)
    /// directly.
    pub(crate) fn check_headers(&self) -> Result<()> {
        self.headers
            .iter()
            .try_for_each(|(name, value)| validate_header(name, value))
    }

    /// Serializes the request for `endpoint`.
    pub(crate) fn write_into(&self, endpoint: &Endpoint, user_agent: &str, dst: &mut BytesMut) {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            self.method,
            endpoint.path,
            endpoint.host_header()
        );

        for (name, value) in &self.headers {
            if is_managed(name) {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }

        if self.header("User-Agent").is_none() && !user_agent.is_empty() {
            head.push_str("User-Agent: ");
            head.push_str(user_agent);
            head.push_str("\r\n");
        }
        if !self.body.is_empty() || matches!(self.method.as_str(), "POST" | "PUT" | "PATCH") {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");

        dst.reserve(head.len() + self.body.len());
        dst.put_slice(head.as_bytes());
        dst.put_slice(&self.body);
    }
}

/// Headers the client always writes itself.
fn is_managed(name: &str) -> bool {
    ["Host", "Content-Length", "Connection", "Transfer-Encoding"]
        .iter()
        .any(|managed| managed.eq_ignore_ascii_case(name))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn render(request: &HttpRequest) -> String {
        let endpoint = Endpoint::from_url(&request.url, crate::protocol::SchemeFamily::Http).unwrap();
        let mut buf = BytesMut::new();
        request.write_into(&endpoint, "wspool-test", &mut buf);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_get_layout() {
        let request = HttpRequest::get("http://example.com:8080/a/b?c=d").unwrap();
        let text = render(&request);

        assert!(text.starts_with("GET /a/b?c=d HTTP/1.1\r\nHost: example.com:8080\r\n"));
        assert!(text.contains("User-Agent: wspool-test\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_post_layout() {
        let request = HttpRequest::post("http://example.com/submit", "a=1")
            .unwrap()
            .with_content_type("application/x-www-form-urlencoded")
            .unwrap()
            .with_header("User-Agent", "custom")
            .unwrap();
        let text = render(&request);

        assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(text.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.contains("User-Agent: custom\r\n"));
        assert!(!text.contains("wspool-test"));
        assert!(text.ends_with("\r\n\r\na=1"));
    }

    #[test]
    fn test_managed_headers_not_duplicated() {
        let request = HttpRequest::get("http://example.com/")
            .unwrap()
            .with_header("connection", "keep-alive")
            .unwrap()
            .with_header("Host", "spoofed")
            .unwrap();
        let text = render(&request);
        assert_eq!(text.matches("Connection:").count(), 1);
        assert!(!text.contains("keep-alive"));
        assert!(!text.contains("spoofed"));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            HttpRequest::get("ws://example.com/"),
            Err(Error::MalformedUrl { .. })
        ));
        assert!(matches!(
            HttpRequest::new("GE T", "http://example.com/"),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(HttpRequest::new("head", "http://x/").unwrap().method, "HEAD");
    }

    #[test]
    fn test_header_line_breaks_rejected() {
        let request = HttpRequest::get("http://example.com/").unwrap();
        assert!(matches!(
            request.clone().with_header("X-Note", "a\r\nX-Injected: 1"),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            request.clone().with_header("X-Note\r\nX-Injected", "1"),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            request.clone().with_content_type("text/plain\nX-Injected: 1"),
            Err(Error::InvalidArgument { .. })
        ));

        let mut direct = request;
        direct.headers.push(("X-Note".into(), "a\r\nb".into()));
        assert!(direct.check_headers().is_err());
    }
}

//! Endpoint parsing for `ws(s)://` and `http(s)://` URLs.
//!
//! Parsing is delegated to the `url` crate; this module narrows the result
//! to the pieces a connection needs and enforces the scheme family.
//!
//! | URL | host | port | path | secure |
//! |-----|------|------|------|--------|
//! | `ws://example.com/chat` | `example.com` | 80 | `/chat` | no |
//! | `wss://secure.example.com:9001/ws` | `secure.example.com` | 9001 | `/ws` | yes |
//! | `ws://localhost` | `localhost` | 80 | `/` | no |

// ============================================================================
// Imports
// ============================================================================

use url::{Host, Url};

use crate::error::{Error, Result};

// ============================================================================
// SchemeFamily
// ============================================================================

/// Which pair of schemes an endpoint may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeFamily {
    /// `ws://` and `wss://`.
    WebSocket,
    /// `http://` and `https://`.
    Http,
}

impl SchemeFamily {
    fn classify(self, scheme: &str) -> Option<bool> {
        match (self, scheme) {
            (Self::WebSocket, "ws") | (Self::Http, "http") => Some(false),
            (Self::WebSocket, "wss") | (Self::Http, "https") => Some(true),
            _ => None,
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Connection target extracted from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    /// Port, defaulted from the scheme when absent.
    pub port: u16,
    /// Request target: path plus query, never empty.
    pub path: String,
    /// `true` for `wss://` and `https://`.
    pub secure: bool,
}

impl Endpoint {
    /// Parses a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedUrl`] if the text is not a URL, has no host, or
    /// uses another scheme.
    pub fn parse_ws(text: &str) -> Result<Self> {
        let url = Url::parse(text).map_err(|e| Error::malformed_url(text, e.to_string()))?;
        Self::from_url(&url, SchemeFamily::WebSocket)
    }

    /// Parses an `http://` or `https://` URL.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedUrl`] if the text is not a URL, has no host, or
    /// uses another scheme.
    pub fn parse_http(text: &str) -> Result<Self> {
        let url = Url::parse(text).map_err(|e| Error::malformed_url(text, e.to_string()))?;
        Self::from_url(&url, SchemeFamily::Http)
    }

    /// Builds an endpoint from an already parsed URL.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedUrl`] on a scheme outside `family` or a missing
    /// host.
    pub fn from_url(url: &Url, family: SchemeFamily) -> Result<Self> {
        let secure = family.classify(url.scheme()).ok_or_else(|| {
            Error::malformed_url(url.as_str(), format!("unsupported scheme '{}'", url.scheme()))
        })?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(Error::malformed_url(url.as_str(), "missing host")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::malformed_url(url.as_str(), "missing port"))?;

        let mut path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            path,
            secure,
        })
    }

    /// Returns the default port for this endpoint's security level.
    #[inline]
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        if self.secure { 443 } else { 80 }
    }

    /// Returns the value for the `Host` request header.
    ///
    /// The port is omitted when it matches the scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

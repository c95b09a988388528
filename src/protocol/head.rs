//! HTTP/1.1 response head parsing.
//!
//! Shared by the WebSocket upgrade handshake and the one-shot HTTP client.
//! A head is the status line plus header lines, terminated by an empty line.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Terminator between head and body.
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Refuse heads larger than this to bound buffering of garbage input.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

// ============================================================================
// Functions
// ============================================================================

/// Returns the length of the head including its terminator, if complete.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Checks that `name: value` serializes as exactly one header line.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `name` is not an HTTP token or `value`
/// contains CR, LF or NUL.
pub fn validate_header(name: &str, value: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(Error::invalid_argument(format!(
            "invalid header name '{}'",
            name.escape_debug()
        )));
    }
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(Error::invalid_argument(format!(
            "header '{name}' value contains a line break"
        )));
    }
    Ok(())
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
}

// ============================================================================
// ResponseHead
// ============================================================================

/// Parsed status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Full status line, e.g. `HTTP/1.1 101 Switching Protocols`.
    pub status_line: String,
    /// Numeric status code.
    pub status_code: u16,
    /// Reason phrase, possibly empty.
    pub status_message: String,
    /// Header list in arrival order; names as sent, values trimmed.
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parses a head (with or without its trailing blank line).
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolViolation`] if the status line is not
    /// `HTTP/<version> <code> [reason]`.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default().trim_end().to_string();
        let mut parts = status_line.splitn(3, ' ');

        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(Error::protocol(format!("invalid status line '{status_line}'")));
        }

        let status_code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| Error::protocol(format!("invalid status code in '{status_line}'")))?;
        let status_message = parts.next().unwrap_or_default().trim().to_string();

        let headers = lines
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            status_line,
            status_code,
            status_message,
            headers,
        })
    }

    /// Returns the first header value with a case-insensitive name match.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the declared `Content-Length`, if present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")
            .and_then(|value| value.parse().ok())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! WebSocket opening handshake.
//!
//! Builds the HTTP Upgrade request and classifies the server's response.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

use super::head::{ResponseHead, validate_header};
use super::url::Endpoint;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version sent in `Sec-WebSocket-Version`.
pub const WEBSOCKET_VERSION: &str = "13";

/// Status code of a successful upgrade.
pub const SWITCHING_PROTOCOLS: u16 = 101;

// ============================================================================
// Key Generation
// ============================================================================

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

// ============================================================================
// UpgradeRequest
// ============================================================================

/// The client's opening handshake.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Target endpoint.
    pub endpoint: Endpoint,
    /// Base64 nonce sent in `Sec-WebSocket-Key`.
    pub key: String,
    /// Optional `Sec-WebSocket-Protocol` value.
    pub protocol: Option<String>,
}

impl UpgradeRequest {
    /// Creates a request with a fresh key. An empty protocol is omitted.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `protocol` contains a line break.
    pub fn new(endpoint: Endpoint, protocol: Option<String>) -> Result<Self> {
        let protocol = protocol.filter(|p| !p.is_empty());
        if let Some(protocol) = &protocol {
            validate_header("Sec-WebSocket-Protocol", protocol)?;
        }
        Ok(Self {
            endpoint,
            key: generate_key(),
            protocol,
        })
    }

    /// Appends the serialized request to `dst`.
    pub fn write_into(&self, dst: &mut BytesMut) {
        let mut head = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n",
            self.endpoint.path,
            self.endpoint.host_header(),
            self.key,
        );
        if let Some(protocol) = &self.protocol {
            head.push_str("Sec-WebSocket-Protocol: ");
            head.push_str(protocol);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        dst.put_slice(head.as_bytes());
    }
}

// ============================================================================
// Response Classification
// ============================================================================

/// Checks the server's handshake response head.
///
/// # Errors
///
/// - [`Error::HandshakeRejected`] for any status other than 101
/// - [`Error::ProtocolViolation`] if the head cannot be parsed
pub fn check_response(head: &[u8]) -> Result<ResponseHead> {
    let head = ResponseHead::parse(head)?;
    if head.status_code != SWITCHING_PROTOCOLS {
        return Err(Error::handshake_rejected(head.status_line));
    }
    Ok(head)
}

// ============================================================================
// Tests
// ============================================================================

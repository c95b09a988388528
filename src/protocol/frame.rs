//! WebSocket frame codec.
//!
//! Pure encode/decode of RFC 6455 frames over byte buffers. No I/O.
//!
//! # Wire Layout
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (0 or 4 bytes)                    |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! Frames produced here are always masked. Decoding accepts both masked
//! and unmasked frames and reports [`Decoded::Incomplete`] when the buffer
//! is shorter than the frame it announces, so callers can keep their
//! buffer and retry once more bytes arrive.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest payload carried in the 7-bit length field.
pub const MAX_INLINE_LEN: usize = 125;

/// Largest payload carried in the 16-bit extended length field.
pub const MAX_MEDIUM_LEN: usize = 65_535;

/// Control frames may not carry more than this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

// ============================================================================
// OpCode
// ============================================================================

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl OpCode {
    /// Parses an opcode nibble.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        (self as u8) >= 0x8
    }

    /// Returns `true` for text and binary.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: OpCode,
    /// Final fragment flag.
    pub fin: bool,
    /// Unmasked payload.
    pub payload: Bytes,
}

/// Result of a [`decode`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was available.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes of input the frame occupied.
        consumed: usize,
    },
    /// The buffer ends before the frame does.
    Incomplete,
}

// ============================================================================
// Sizing
// ============================================================================

/// Returns the number of extended-length bytes for a payload length.
#[inline]
#[must_use]
pub const fn extended_len_bytes(payload_len: usize) -> usize {
    if payload_len <= MAX_INLINE_LEN {
        0
    } else if payload_len <= MAX_MEDIUM_LEN {
        2
    } else {
        8
    }
}

/// Returns the exact size of a masked frame carrying `payload_len` bytes.
#[inline]
#[must_use]
pub const fn encoded_len(payload_len: usize) -> usize {
    2 + extended_len_bytes(payload_len) + 4 + payload_len
}

// ============================================================================
// Masking
// ============================================================================

/// Generates a fresh random masking key.
#[inline]
#[must_use]
pub fn generate_mask() -> [u8; 4] {
    rand::random()
}

/// XORs `buf` with `key` in a 4-byte cyclic pattern.
///
/// Applying the same key twice restores the input.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk[0] ^= key[0];
        chunk[1] ^= key[1];
        chunk[2] ^= key[2];
        chunk[3] ^= key[3];
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a masked frame with a freshly generated key.
#[must_use]
pub fn encode(payload: &[u8], opcode: OpCode, fin: bool) -> Bytes {
    encode_with_mask(payload, opcode, fin, generate_mask())
}

/// Encodes a masked frame with the given key.
#[must_use]
pub fn encode_with_mask(payload: &[u8], opcode: OpCode, fin: bool, mask: [u8; 4]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(payload.len()));
    encode_into(&mut buf, payload, opcode, fin, mask);
    buf.freeze()
}

/// Appends a masked frame to `dst`.
///
/// Reserves the exact frame size first, so `dst` grows at most once.
pub fn encode_into(dst: &mut BytesMut, payload: &[u8], opcode: OpCode, fin: bool, mask: [u8; 4]) {
    let len = payload.len();
    dst.reserve(encoded_len(len));

    let first = (if fin { FIN_BIT } else { 0 }) | opcode.as_u8();
    dst.put_u8(first);

    match extended_len_bytes(len) {
        0 => dst.put_u8(MASK_BIT | len as u8),
        2 => {
            dst.put_u8(MASK_BIT | LEN_16);
            dst.put_u16(len as u16);
        }
        _ => {
            dst.put_u8(MASK_BIT | LEN_64);
            dst.put_u64(len as u64);
        }
    }

    dst.put_slice(&mask);

    let start = dst.len();
    dst.put_slice(payload);
    apply_mask(&mut dst[start..], mask);
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one frame from the front of `buf`.
///
/// # Errors
///
/// [`Error::ProtocolViolation`] if the header uses reserved bits, an
/// unknown opcode, a fragmented or oversized control frame, or a 64-bit
/// length with the most significant bit set.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < 2 {
        return Ok(Decoded::Incomplete);
    }

    let first = buf[0];
    let second = buf[1];

    if first & RSV_BITS != 0 {
        return Err(Error::protocol("reserved header bits set"));
    }

    let opcode = OpCode::from_u8(first & OPCODE_BITS).ok_or_else(|| {
        Error::protocol(format!("unknown opcode 0x{:x}", first & OPCODE_BITS))
    })?;
    let fin = first & FIN_BIT != 0;
    let masked = second & MASK_BIT != 0;

    let (declared_len, mut header_len) = match second & LEN_BITS {
        LEN_16 => {
            if buf.len() < 4 {
                return Ok(Decoded::Incomplete);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        LEN_64 => {
            if buf.len() < 10 {
                return Ok(Decoded::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            if len & (1 << 63) != 0 {
                return Err(Error::protocol("64-bit payload length has its high bit set"));
            }
            (len, 10)
        }
        inline => (u64::from(inline), 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(Error::protocol(format!("fragmented {opcode} frame")));
        }
        if declared_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(Error::protocol(format!(
                "{opcode} frame payload of {declared_len} bytes exceeds {MAX_CONTROL_PAYLOAD}"
            )));
        }
    }

    let mask = if masked {
        if buf.len() < header_len + 4 {
            return Ok(Decoded::Incomplete);
        }
        let key = [
            buf[header_len],
            buf[header_len + 1],
            buf[header_len + 2],
            buf[header_len + 3],
        ];
        header_len += 4;
        Some(key)
    } else {
        None
    };

    let payload_len = usize::try_from(declared_len)
        .map_err(|_| Error::protocol(format!("payload of {declared_len} bytes is too large")))?;
    let total = header_len
        .checked_add(payload_len)
        .ok_or_else(|| Error::protocol(format!("payload of {declared_len} bytes is too large")))?;

    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let mut payload = BytesMut::from(&buf[header_len..total]);
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            opcode,
            fin,
            payload: payload.freeze(),
        },
        consumed: total,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn decode_frame(buf: &[u8]) -> (Frame, usize) {
        match decode(buf).expect("valid frame") {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            Decoded::Incomplete => panic!("frame should be complete"),
        }
    }

    /// Builds an unmasked server-style frame.
    fn server_frame(payload: &[u8], opcode: OpCode, fin: bool) -> Vec<u8> {
        let mut out = vec![(if fin { 0x80 } else { 0 }) | opcode.as_u8()];
        match extended_len_bytes(payload.len()) {
            0 => out.push(payload.len() as u8),
            2 => {
                out.push(126);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            }
            _ => {
                out.push(127);
                out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
            }
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_length_boundaries() {
        assert_eq!(extended_len_bytes(0), 0);
        assert_eq!(extended_len_bytes(125), 0);
        assert_eq!(extended_len_bytes(126), 2);
        assert_eq!(extended_len_bytes(65_535), 2);
        assert_eq!(extended_len_bytes(65_536), 8);

        assert_eq!(encode(&[0u8; 125], OpCode::Binary, true).len(), 2 + 4 + 125);
        assert_eq!(encode(&[0u8; 126], OpCode::Binary, true).len(), 2 + 2 + 4 + 126);
        assert_eq!(
            encode(&vec![0u8; 65_536], OpCode::Binary, true).len(),
            2 + 8 + 4 + 65_536
        );
    }

    #[test]
    fn test_header_bits() {
        let frame = encode_with_mask(b"hi", OpCode::Text, true, [1, 2, 3, 4]);
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 0x80 | 2);
        assert_eq!(&frame[2..6], &[1, 2, 3, 4]);
        assert_eq!(frame[6], b'h' ^ 1);
        assert_eq!(frame[7], b'i' ^ 2);

        let frame = encode_with_mask(b"", OpCode::Continuation, false, [0; 4]);
        assert_eq!(frame[0], 0x00);
    }

    #[test]
    fn test_extended_length_is_big_endian() {
        let frame = encode(&[7u8; 300], OpCode::Binary, true);
        assert_eq!(frame[1], 0x80 | 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 300);

        let frame = encode(&vec![7u8; 70_000], OpCode::Binary, true);
        assert_eq!(frame[1], 0x80 | 127);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&frame[2..10]);
        assert_eq!(u64::from_be_bytes(raw), 70_000);
    }

    #[test]
    fn test_decode_unmasked_frame() {
        let raw = server_frame(b"hello", OpCode::Text, true);
        let (frame, consumed) = decode_frame(&raw);
        assert_eq!(consumed, raw.len());
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.fin);
        assert_eq!(&frame.payload[..], b"hello");
    }

    #[test]
    fn test_decode_masked_frame_removes_mask() {
        let key = [0xAA, 0x55, 0x0F, 0xF0];
        let raw = encode_with_mask(b"masked payload", OpCode::Binary, true, key);
        assert_ne!(&raw[6..], b"masked payload");
        let (frame, _) = decode_frame(&raw);
        assert_eq!(&frame.payload[..], b"masked payload");
    }

    #[test]
    fn test_decode_reports_incomplete_for_every_prefix() {
        let raw = encode(&[3u8; 300], OpCode::Binary, true);
        for cut in 0..raw.len() {
            assert_eq!(decode(&raw[..cut]).unwrap(), Decoded::Incomplete, "cut at {cut}");
        }
        let (frame, consumed) = decode_frame(&raw);
        assert_eq!(consumed, raw.len());
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut raw = server_frame(b"one", OpCode::Text, true);
        raw.extend_from_slice(&server_frame(b"two", OpCode::Text, true));
        let (first, consumed) = decode_frame(&raw);
        assert_eq!(&first.payload[..], b"one");
        let (second, _) = decode_frame(&raw[consumed..]);
        assert_eq!(&second.payload[..], b"two");
    }

    #[test]
    fn test_decode_rejects_reserved_bits() {
        let mut raw = server_frame(b"x", OpCode::Text, true);
        raw[0] |= 0x40;
        assert!(matches!(decode(&raw), Err(Error::ProtocolViolation { .. })));
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let raw = [0x83, 0x00];
        assert!(matches!(decode(&raw), Err(Error::ProtocolViolation { .. })));
    }

    #[test]
    fn test_decode_rejects_fragmented_control() {
        let raw = server_frame(b"", OpCode::Ping, false);
        assert!(matches!(decode(&raw), Err(Error::ProtocolViolation { .. })));
    }

    #[test]
    fn test_decode_rejects_oversized_control() {
        let raw = server_frame(&[0u8; 126], OpCode::Ping, true);
        assert!(matches!(decode(&raw), Err(Error::ProtocolViolation { .. })));
    }

    #[test]
    fn test_decode_rejects_64bit_high_bit() {
        let mut raw = vec![0x82, 127];
        raw.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert!(matches!(decode(&raw), Err(Error::ProtocolViolation { .. })));
    }

    #[test]
    fn test_roundtrip_one_mebibyte_with_nuls() {
        let payload: Vec<u8> = (0..(1usize << 20)).map(|i| (i % 7) as u8).collect();
        let raw = encode(&payload, OpCode::Binary, true);
        let (frame, consumed) = decode_frame(&raw);
        assert_eq!(consumed, raw.len());
        assert_eq!(frame.payload.len(), payload.len());
        assert!(frame.payload[..] == payload[..]);
    }

    #[test]
    fn test_apply_mask_is_involution() {
        let original = b"the quick brown fox".to_vec();
        let mut buf = original.clone();
        apply_mask(&mut buf, [9, 8, 7, 6]);
        assert_ne!(buf, original);
        apply_mask(&mut buf, [9, 8, 7, 6]);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(OpCode::Binary.is_data());
        assert!(!OpCode::Continuation.is_data());
        assert_eq!(OpCode::from_u8(0xA), Some(OpCode::Pong));
        assert_eq!(OpCode::from_u8(0x3), None);
    }

    proptest! {
        #[test]
        fn prop_roundtrip_data_frames(
            payload in prop::collection::vec(any::<u8>(), 0..70_000),
            binary in any::<bool>(),
        ) {
            let opcode = if binary { OpCode::Binary } else { OpCode::Text };
            let raw = encode(&payload, opcode, true);
            prop_assert_eq!(raw.len(), encoded_len(payload.len()));
            let (frame, consumed) = decode_frame(&raw);
            prop_assert_eq!(consumed, raw.len());
            prop_assert_eq!(frame.opcode, opcode);
            prop_assert!(frame.fin);
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }

        #[test]
        fn prop_mask_removal(
            payload in prop::collection::vec(any::<u8>(), 0..512),
            key in any::<[u8; 4]>(),
        ) {
            let masked = encode_with_mask(&payload, OpCode::Binary, true, key);
            let (frame, _) = decode_frame(&masked);
            prop_assert_eq!(&frame.payload[..], &payload[..]);

            let unmasked = server_frame(&payload, OpCode::Binary, true);
            let (frame, _) = decode_frame(&unmasked);
            prop_assert_eq!(&frame.payload[..], &payload[..]);
        }
    }
}

//! Per-connection WebSocket state machine.
//!
//! A [`Session`] consumes inbound bytes and clock ticks and produces
//! outbound bytes plus [`SessionEvent`]s. It never touches a socket: the
//! event loop moves bytes between the session and its transport and turns
//! events into handler callbacks.
//!
//! # States
//!
//! ```text
//! CONNECTING ──connected──► HANDSHAKE ──101──► CONNECTED ──close──► CLOSING ──► CLOSED
//!      │                        │                  │                              ▲
//!      └──── error/timeout ─────┴──────────────────┴──── eof/error/timeout ───────┘
//! ```
//!
//! Per attempt exactly one of [`SessionEvent::Opened`] and
//! [`SessionEvent::Failed`] is emitted, and [`SessionEvent::Closed`] is
//! emitted at most once, only after `Opened`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::protocol::frame::{self, Decoded, Frame, MAX_CONTROL_PAYLOAD, OpCode};
use crate::protocol::handshake::{self, UpgradeRequest};
use crate::protocol::head::{MAX_HEAD_LEN, find_head_end};

// ============================================================================
// Constants
// ============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Reported when a close frame carries no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Reported when the transport drops without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Message too big.
pub const CLOSE_TOO_BIG: u16 = 1009;

/// Longest close reason that fits a control frame after the status code.
const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// Largest frame header: 2 + 8 extended length + 4 mask.
const MAX_FRAME_HEADER: usize = 14;

// ============================================================================
// SessionState
// ============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Transport connect in progress.
    Connecting = 0,
    /// Upgrade request sent, waiting for 101.
    Handshake = 1,
    /// Open for messages.
    Connected = 2,
    /// Close frame sent or received, waiting for the other side.
    Closing = 3,
    /// Terminal.
    Closed = 4,
}

impl SessionState {
    /// Decodes a value stored with `as u8`. Unknown values map to `Closed`.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Handshake,
            2 => Self::Connected,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshake => "handshake",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Something the owner of the session must report to the application.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake completed.
    Opened,
    /// A complete message arrived.
    Message {
        /// `Text` or `Binary`.
        opcode: OpCode,
        /// Reassembled payload.
        payload: Bytes,
    },
    /// Connection closed after having been open.
    Closed {
        /// Close status code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// Connection attempt failed before opening.
    Failed(Error),
}

// ============================================================================
// Session
// ============================================================================

struct Fragment {
    opcode: OpCode,
    data: BytesMut,
}

/// One WebSocket connection's protocol state.
pub struct Session {
    state: SessionState,
    request: UpgradeRequest,
    config: PoolConfig,

    outbound: BytesMut,
    read_buf: Vec<u8>,
    read_pos: usize,
    discard_input: bool,

    fragment: Option<Fragment>,
    backlog: VecDeque<(Bytes, OpCode)>,
    events: Vec<SessionEvent>,

    close_status: Option<(u16, String)>,

    started: Instant,
    last_ping: Instant,
    last_pong: Instant,
    pong_deadline: Option<Instant>,
    closing_since: Option<Instant>,
}

impl Session {
    /// Creates a session in `Connecting`. Handshake timing starts at `now`.
    #[must_use]
    pub fn new(request: UpgradeRequest, config: PoolConfig, now: Instant) -> Self {
        Self {
            state: SessionState::Connecting,
            request,
            config,
            outbound: BytesMut::new(),
            read_buf: Vec::new(),
            read_pos: 0,
            discard_input: false,
            fragment: None,
            backlog: VecDeque::new(),
            events: Vec::new(),
            close_status: None,
            started: now,
            last_ping: now,
            last_pong: now,
            pong_deadline: None,
            closing_since: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the upgrade request this session was created with.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    /// Returns when the last pong (or the handshake response) arrived.
    #[inline]
    #[must_use]
    pub fn last_pong(&self) -> Instant {
        self.last_pong
    }

    /// Returns `true` if bytes are waiting to be written.
    #[inline]
    #[must_use]
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Takes the bytes to be written to the transport.
    pub fn take_outbound(&mut self) -> BytesMut {
        self.outbound.split()
    }

    /// Takes the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // Transport Input
    // ========================================================================

    /// The transport connected: write the upgrade request.
    pub fn on_transport_connected(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.request.write_into(&mut self.outbound);
        self.state = SessionState::Handshake;
        trace!(host = %self.request.endpoint.host, "Upgrade request queued");
    }

    /// The transport reported an error.
    pub fn on_transport_error(&mut self, error: std::io::Error) {
        match self.state {
            SessionState::Connecting => self.fail(Error::connect(error.to_string())),
            SessionState::Handshake => self.fail(Error::Io(error)),
            SessionState::Connected => self.finish(CLOSE_ABNORMAL, error.to_string()),
            SessionState::Closing => self.finish_handshake_close(),
            SessionState::Closed => {}
        }
    }

    /// The peer closed its side of the transport.
    pub fn on_eof(&mut self) {
        match self.state {
            SessionState::Connecting | SessionState::Handshake => {
                self.fail(Error::ConnectionClosed);
            }
            SessionState::Connected => self.finish(CLOSE_ABNORMAL, "connection reset"),
            SessionState::Closing => self.finish_handshake_close(),
            SessionState::Closed => {}
        }
    }

    /// Feeds bytes read from the transport.
    pub fn receive(&mut self, data: &[u8], now: Instant) {
        match self.state {
            SessionState::Handshake | SessionState::Connected | SessionState::Closing => {}
            SessionState::Connecting | SessionState::Closed => return,
        }
        if self.discard_input {
            return;
        }

        self.read_buf.extend_from_slice(data);

        if self.state == SessionState::Handshake && !self.read_handshake(now) {
            return;
        }
        self.read_frames(now);
    }

    /// Returns `false` while the response head is incomplete or rejected.
    fn read_handshake(&mut self, now: Instant) -> bool {
        let pending = &self.read_buf[self.read_pos..];
        let Some(head_len) = find_head_end(pending) else {
            if pending.len() > MAX_HEAD_LEN {
                self.fail(Error::protocol("handshake response head too large"));
            }
            return false;
        };

        match handshake::check_response(&pending[..head_len]) {
            Ok(head) => {
                self.read_pos += head_len;
                debug!(
                    host = %self.request.endpoint.host,
                    status = head.status_code,
                    "WebSocket handshake completed"
                );
                self.open(now);
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn read_frames(&mut self, now: Instant) {
        while matches!(self.state, SessionState::Connected | SessionState::Closing) {
            match frame::decode(&self.read_buf[self.read_pos..]) {
                Ok(Decoded::Frame { frame, consumed }) => {
                    self.read_pos += consumed;
                    self.handle_frame(frame, now);
                }
                Ok(Decoded::Incomplete) => {
                    let buffered = self.read_buf.len() - self.read_pos;
                    if buffered > self.config.max_message_size.saturating_add(MAX_FRAME_HEADER) {
                        self.reject(CLOSE_TOO_BIG, "message too big", now);
                        self.discard_input = true;
                    }
                    break;
                }
                Err(e) => {
                    // Frame boundaries are lost; nothing after this point can be decoded.
                    self.reject(CLOSE_PROTOCOL_ERROR, &e.to_string(), now);
                    self.discard_input = true;
                    break;
                }
            }
            if self.discard_input {
                break;
            }
        }

        if self.discard_input || self.state == SessionState::Closed {
            self.read_buf.clear();
            self.read_pos = 0;
        } else {
            self.compact();
        }
    }

    fn compact(&mut self) {
        if self.read_pos == self.read_buf.len() {
            self.read_buf.clear();
            self.read_pos = 0;
        } else if self.read_pos > self.read_buf.len() / 2 {
            self.read_buf.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }

    // ========================================================================
    // Frame Handling
    // ========================================================================

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        trace!(opcode = %frame.opcode, fin = frame.fin, len = frame.payload.len(), "Frame received");

        match frame.opcode {
            OpCode::Ping => {
                if self.state == SessionState::Connected {
                    self.write_frame(&frame.payload, OpCode::Pong, true);
                }
            }
            OpCode::Pong => {
                self.last_pong = now;
                self.pong_deadline = None;
            }
            OpCode::Close => self.handle_close_frame(&frame.payload, now),
            OpCode::Continuation => {
                if self.state != SessionState::Connected {
                    return;
                }
                let Some(fragment) = self.fragment.as_mut() else {
                    self.reject(CLOSE_PROTOCOL_ERROR, "continuation without an open message", now);
                    return;
                };
                if fragment.data.len() + frame.payload.len() > self.config.max_message_size {
                    self.reject(CLOSE_TOO_BIG, "message too big", now);
                    return;
                }
                fragment.data.extend_from_slice(&frame.payload);
                if frame.fin
                    && let Some(done) = self.fragment.take()
                {
                    self.deliver(done.opcode, done.data.freeze());
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.state != SessionState::Connected {
                    return;
                }
                if self.fragment.is_some() {
                    self.reject(CLOSE_PROTOCOL_ERROR, "new message while a fragmented message is open", now);
                    return;
                }
                if frame.payload.len() > self.config.max_message_size {
                    self.reject(CLOSE_TOO_BIG, "message too big", now);
                    return;
                }
                if frame.fin {
                    self.deliver(frame.opcode, frame.payload);
                } else {
                    self.fragment = Some(Fragment {
                        opcode: frame.opcode,
                        data: BytesMut::from(&frame.payload[..]),
                    });
                }
            }
        }
    }

    fn handle_close_frame(&mut self, payload: &[u8], now: Instant) {
        let (code, reason) = parse_close_payload(payload);

        match self.state {
            SessionState::Connected => {
                debug!(code, %reason, "Close received");
                if code == CLOSE_NO_STATUS {
                    self.write_frame(&[], OpCode::Close, true);
                } else {
                    self.write_frame(&code.to_be_bytes(), OpCode::Close, true);
                }
                self.close_status = Some((code, reason));
                self.enter_closing(now);
            }
            SessionState::Closing => self.finish(code, reason),
            _ => {}
        }
    }

    fn deliver(&mut self, opcode: OpCode, payload: Bytes) {
        trace!(%opcode, len = payload.len(), "Message received");
        self.events.push(SessionEvent::Message { opcode, payload });
    }

    /// Closes with `code` after a peer error.
    ///
    /// Decoding continues: in CLOSING data frames are dropped while close,
    /// ping and pong still complete the handshake.
    fn reject(&mut self, code: u16, reason: &str, now: Instant) {
        warn!(
            host = %self.request.endpoint.host,
            code,
            reason,
            "Protocol violation, closing connection"
        );
        self.fragment = None;
        if self.state == SessionState::Connected {
            self.write_close_frame(code, reason);
            self.close_status = Some((code, reason.to_string()));
            self.enter_closing(now);
        }
    }

    // ========================================================================
    // Application Input
    // ========================================================================

    /// Sends a data message, or queues it until the handshake completes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for continuation or close opcodes, or an
    ///   oversized ping/pong payload
    /// - [`Error::ConnectionClosed`] once the session is closing
    pub fn send(&mut self, payload: Bytes, opcode: OpCode) -> Result<()> {
        validate_outbound(&payload, opcode)?;

        match self.state {
            SessionState::Connecting | SessionState::Handshake => {
                self.backlog.push_back((payload, opcode));
                Ok(())
            }
            SessionState::Connected => {
                self.write_message(&payload, opcode);
                Ok(())
            }
            SessionState::Closing | SessionState::Closed => Err(Error::ConnectionClosed),
        }
    }

    /// Sends a ping and arms the pong deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `payload` exceeds 125 bytes
    /// - [`Error::ConnectionClosed`] unless the session is open
    pub fn ping(&mut self, payload: &[u8], now: Instant) -> Result<()> {
        validate_outbound(payload, OpCode::Ping)?;
        if self.state != SessionState::Connected {
            return Err(Error::ConnectionClosed);
        }
        self.write_frame(payload, OpCode::Ping, true);
        self.last_ping = now;
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(now + self.config.pong_timeout);
        }
        Ok(())
    }

    /// Starts the closing handshake.
    ///
    /// Before the handshake completes this cancels the attempt and reports
    /// [`SessionEvent::Failed`] with [`Error::ConnectionClosed`].
    pub fn close(&mut self, code: u16, reason: &str, now: Instant) {
        match self.state {
            SessionState::Connecting | SessionState::Handshake => {
                self.fail(Error::ConnectionClosed);
            }
            SessionState::Connected => {
                debug!(code, reason, "Closing connection");
                self.write_close_frame(code, reason);
                self.close_status = Some((code, truncate_reason(reason).to_string()));
                self.enter_closing(now);
            }
            SessionState::Closing | SessionState::Closed => {}
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Fires every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        match self.state {
            SessionState::Connecting | SessionState::Handshake => {
                if now >= self.started + self.config.handshake_timeout {
                    self.fail(Error::timeout(
                        "websocket handshake",
                        duration_ms(self.config.handshake_timeout),
                    ));
                }
            }
            SessionState::Connected => {
                if let Some(deadline) = self.pong_deadline
                    && now >= deadline
                {
                    warn!(host = %self.request.endpoint.host, "Pong not received in time");
                    self.finish(CLOSE_ABNORMAL, "keepalive timeout");
                    return;
                }
                if self.config.keepalive_enabled()
                    && self.pong_deadline.is_none()
                    && now >= self.last_ping + self.config.ping_interval
                {
                    trace!("Keepalive ping");
                    let _ = self.ping(&[], now);
                }
            }
            SessionState::Closing => {
                if let Some(since) = self.closing_since
                    && now >= since + self.config.close_timeout
                {
                    debug!("Close handshake timed out");
                    self.finish_handshake_close();
                }
            }
            SessionState::Closed => {}
        }
    }

    /// Returns the earliest instant at which [`Session::poll_timers`] has work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Connecting | SessionState::Handshake => {
                Some(self.started + self.config.handshake_timeout)
            }
            SessionState::Connected => {
                let ping = (self.config.keepalive_enabled() && self.pong_deadline.is_none())
                    .then(|| self.last_ping + self.config.ping_interval);
                match (ping, self.pong_deadline) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
            SessionState::Closing => self.closing_since.map(|since| since + self.config.close_timeout),
            SessionState::Closed => None,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn open(&mut self, now: Instant) {
        self.state = SessionState::Connected;
        self.last_ping = now;
        self.last_pong = now;
        self.events.push(SessionEvent::Opened);

        while let Some((payload, opcode)) = self.backlog.pop_front() {
            self.write_message(&payload, opcode);
        }
    }

    fn enter_closing(&mut self, now: Instant) {
        self.state = SessionState::Closing;
        self.closing_since = Some(now);
        self.pong_deadline = None;
    }

    fn fail(&mut self, error: Error) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Handshake) {
            return;
        }
        if !self.backlog.is_empty() {
            warn!(
                dropped = self.backlog.len(),
                host = %self.request.endpoint.host,
                "Discarding messages queued before open"
            );
            self.backlog.clear();
        }
        debug!(host = %self.request.endpoint.host, error = %error, "Connection attempt failed");
        self.state = SessionState::Closed;
        self.events.push(SessionEvent::Failed(error));
    }

    fn finish(&mut self, code: u16, reason: impl Into<String>) {
        if !matches!(self.state, SessionState::Connected | SessionState::Closing) {
            return;
        }
        let reason = reason.into();
        debug!(code, %reason, "Connection closed");
        self.state = SessionState::Closed;
        self.fragment = None;
        self.events.push(SessionEvent::Closed { code, reason });
    }

    fn finish_handshake_close(&mut self) {
        let (code, reason) = self
            .close_status
            .take()
            .unwrap_or_else(|| (CLOSE_ABNORMAL, String::new()));
        self.finish(code, reason);
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn write_message(&mut self, payload: &[u8], opcode: OpCode) {
        if opcode.is_control() {
            self.write_frame(payload, opcode, true);
            return;
        }

        let max = self.config.fragment_size.max(1);
        if payload.len() <= max {
            self.write_frame(payload, opcode, true);
            return;
        }

        let mut chunks = payload.chunks(max).peekable();
        let mut next_opcode = opcode;
        while let Some(chunk) = chunks.next() {
            let fin = chunks.peek().is_none();
            self.write_frame(chunk, next_opcode, fin);
            next_opcode = OpCode::Continuation;
        }
    }

    fn write_close_frame(&mut self, code: u16, reason: &str) {
        let reason = truncate_reason(reason);
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.write_frame(&payload, OpCode::Close, true);
    }

    fn write_frame(&mut self, payload: &[u8], opcode: OpCode, fin: bool) {
        frame::encode_into(&mut self.outbound, payload, opcode, fin, frame::generate_mask());
        trace!(%opcode, fin, len = payload.len(), "Frame queued");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("host", &self.request.endpoint.host)
            .field("outbound", &self.outbound.len())
            .field("backlog", &self.backlog.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Rejects opcodes and payloads the application may not send.
pub(crate) fn validate_outbound(payload: &[u8], opcode: OpCode) -> Result<()> {
    match opcode {
        OpCode::Continuation => Err(Error::invalid_argument(
            "continuation frames are produced by fragmentation only",
        )),
        OpCode::Close => Err(Error::invalid_argument("use close() to send a close frame")),
        OpCode::Ping | OpCode::Pong if payload.len() > MAX_CONTROL_PAYLOAD => Err(
            Error::invalid_argument(format!(
                "{opcode} payload of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
                payload.len()
            )),
        ),
        _ => Ok(()),
    }
}

/// Splits a close payload into code and reason. Empty payloads report 1005.
fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() < 2 {
        return (CLOSE_NO_STATUS, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (code, reason)
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

//! Application callbacks.
//!
//! Handlers run on the pool's loop thread. They must not block: a slow
//! handler stalls every connection in the pool.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::identifiers::ConnectionId;
use crate::protocol::OpCode;

// ============================================================================
// WebSocketHandler
// ============================================================================

/// Receives connection events.
///
/// For each connection attempt exactly one of [`on_open`](Self::on_open)
/// and [`on_failed`](Self::on_failed) is called. [`on_close`](Self::on_close)
/// is called at most once, and only after `on_open`.
///
/// Removing a connection (dropping its [`WebSocketClient`](super::WebSocketClient))
/// cancels it silently: no further callbacks run.
pub trait WebSocketHandler: Send + 'static {
    /// The handshake completed.
    fn on_open(&mut self, id: ConnectionId) {
        let _ = id;
    }

    /// A complete text or binary message arrived.
    fn on_message(&mut self, id: ConnectionId, payload: &[u8], opcode: OpCode);

    /// The connection closed after having been open.
    fn on_close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        let _ = (id, code, reason);
    }

    /// The connection attempt failed before opening.
    fn on_failed(&mut self, id: ConnectionId, error: Error) {
        let _ = (id, error);
    }
}

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Owned form of a handler callback.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// See [`WebSocketHandler::on_open`].
    Open(ConnectionId),
    /// See [`WebSocketHandler::on_message`].
    Message {
        /// Connection the message arrived on.
        id: ConnectionId,
        /// Message payload.
        payload: Bytes,
        /// `Text` or `Binary`.
        opcode: OpCode,
    },
    /// See [`WebSocketHandler::on_close`].
    Close {
        /// Closed connection.
        id: ConnectionId,
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// See [`WebSocketHandler::on_failed`].
    Failed {
        /// Failed connection.
        id: ConnectionId,
        /// Failure cause.
        error: Error,
    },
}

impl ConnectionEvent {
    /// Returns the connection this event belongs to.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Open(id) => *id,
            Self::Message { id, .. } | Self::Close { id, .. } | Self::Failed { id, .. } => *id,
        }
    }

    /// Returns `true` for events after which the connection produces nothing.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Close { .. } | Self::Failed { .. })
    }
}

// ============================================================================
// ChannelHandler
// ============================================================================

/// Receiving half paired with a [`ChannelHandler`].
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Handler that forwards every callback into a channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelHandler {
    /// Creates a handler and the receiver its events go to.
    #[must_use]
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event);
    }
}

impl WebSocketHandler for ChannelHandler {
    fn on_open(&mut self, id: ConnectionId) {
        self.forward(ConnectionEvent::Open(id));
    }

    fn on_message(&mut self, id: ConnectionId, payload: &[u8], opcode: OpCode) {
        self.forward(ConnectionEvent::Message {
            id,
            payload: Bytes::copy_from_slice(payload),
            opcode,
        });
    }

    fn on_close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        self.forward(ConnectionEvent::Close {
            id,
            code,
            reason: reason.to_string(),
        });
    }

    fn on_failed(&mut self, id: ConnectionId, error: Error) {
        self.forward(ConnectionEvent::Failed { id, error });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_handler_forwards_in_order() {
        let (mut handler, mut rx) = ChannelHandler::new();
        let id = ConnectionId::from_index(3);

        handler.on_open(id);
        handler.on_message(id, b"payload", OpCode::Binary);
        handler.on_close(id, 1000, "bye");

        assert!(matches!(rx.try_recv().unwrap(), ConnectionEvent::Open(got) if got == id));
        match rx.try_recv().unwrap() {
            ConnectionEvent::Message { payload, opcode, .. } => {
                assert_eq!(payload.as_ref(), b"payload");
                assert_eq!(opcode, OpCode::Binary);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let close = rx.try_recv().unwrap();
        assert!(close.is_terminal());
        assert_eq!(close.id(), id);
    }

    #[test]
    fn test_channel_handler_survives_dropped_receiver() {
        let (mut handler, rx) = ChannelHandler::new();
        drop(rx);
        handler.on_failed(ConnectionId::from_index(0), Error::ConnectionClosed);
    }

    #[test]
    fn test_default_methods() {
        struct Count(usize);
        impl WebSocketHandler for Count {
            fn on_message(&mut self, _: ConnectionId, _: &[u8], _: OpCode) {
                self.0 += 1;
            }
        }

        let mut handler = Count(0);
        let id = ConnectionId::from_index(0);
        handler.on_open(id);
        handler.on_message(id, b"x", OpCode::Text);
        handler.on_close(id, 1000, "");
        assert_eq!(handler.0, 1);
    }
}

//! End-to-end WebSocket pool behaviour against a real peer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{WsBehavior, dead_port, eventually, http_server, next_event, response, ws_server};
use parking_lot::Mutex;
use wspool::{
    ConnectionEvent, ConnectionId, ConnectionPool, Error, OpCode, PoolConfig, SessionState,
    WebSocketClient, WebSocketHandler,
};

const WAIT: Duration = Duration::from_secs(5);

fn pool() -> ConnectionPool {
    common::init_tracing();
    ConnectionPool::new(PoolConfig::default())
}

fn expect_open(events: &mut wspool::EventReceiver) {
    match next_event(events, WAIT) {
        Some(ConnectionEvent::Open(_)) => {}
        other => panic!("expected open, got {other:?}"),
    }
}

/// Drops its own client from `on_open` and records every callback.
struct DropOnOpen {
    client: Arc<Mutex<Option<WebSocketClient>>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl WebSocketHandler for DropOnOpen {
    fn on_open(&mut self, _id: ConnectionId) {
        self.seen.lock().push("open".into());
        let client = self.client.lock().take();
        drop(client);
    }

    fn on_message(&mut self, _id: ConnectionId, payload: &[u8], _opcode: OpCode) {
        let text = String::from_utf8_lossy(payload);
        self.seen.lock().push(format!("message {text}"));
    }

    fn on_close(&mut self, _id: ConnectionId, code: u16, _reason: &str) {
        self.seen.lock().push(format!("close {code}"));
    }

    fn on_failed(&mut self, _id: ConnectionId, error: Error) {
        self.seen.lock().push(format!("failed {error}"));
    }
}

/// Connects with [`DropOnOpen`] and returns its callback log.
fn connect_dropping_on_open(
    pool: &ConnectionPool,
    url: &str,
) -> anyhow::Result<Arc<Mutex<Vec<String>>>> {
    let client = Arc::new(Mutex::new(None));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = DropOnOpen {
        client: Arc::clone(&client),
        seen: Arc::clone(&seen),
    };

    // Held across connect so on_open cannot run before the handle is stored.
    let mut slot = client.lock();
    *slot = Some(pool.connect(url, handler)?);
    drop(slot);
    Ok(seen)
}

fn expect_message(events: &mut wspool::EventReceiver) -> (Vec<u8>, OpCode) {
    match next_event(events, WAIT) {
        Some(ConnectionEvent::Message {
            payload, opcode, ..
        }) => (payload.to_vec(), opcode),
        other => panic!("expected message, got {other:?}"),
    }
}

#[test]
fn echo_text_and_binary() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let (client, mut events) = pool.connect_channel(&format!("ws://127.0.0.1:{port}/echo"))?;

    expect_open(&mut events);
    assert!(client.is_connected());

    client.send_text("hello")?;
    assert_eq!(expect_message(&mut events), (b"hello".to_vec(), OpCode::Text));

    client.send_binary(vec![0u8, 1, 2, 255])?;
    assert_eq!(
        expect_message(&mut events),
        (vec![0u8, 1, 2, 255], OpCode::Binary)
    );
    Ok(())
}

#[test]
fn fragmented_message_round_trip() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let (client, mut events) = pool.connect_channel(&format!("ws://127.0.0.1:{port}/"))?;
    expect_open(&mut events);

    // Three 32 KiB fragments plus a tail on the way out.
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    client.send_binary(payload.clone())?;

    let (echoed, opcode) = expect_message(&mut events);
    assert_eq!(opcode, OpCode::Binary);
    assert_eq!(echoed.len(), payload.len());
    assert_eq!(echoed, payload);
    Ok(())
}

#[test]
fn messages_sent_before_open_are_delivered_in_order() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let (client, mut events) = pool.connect_channel(&format!("ws://127.0.0.1:{port}/"))?;

    client.send_text("first")?;
    client.send_text("second")?;

    expect_open(&mut events);
    assert_eq!(expect_message(&mut events).0, b"first");
    assert_eq!(expect_message(&mut events).0, b"second");
    Ok(())
}

#[test]
fn client_close_handshake() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let (client, mut events) = pool.connect_channel(&format!("ws://127.0.0.1:{port}/"))?;
    expect_open(&mut events);

    client.close_normal()?;
    match next_event(&mut events, WAIT) {
        Some(ConnectionEvent::Close { code, .. }) => assert_eq!(code, 1000),
        other => panic!("expected close, got {other:?}"),
    }
    assert!(eventually(|| client.state() == SessionState::Closed));
    assert!(matches!(client.send_text("late"), Err(Error::ConnectionClosed)));
    Ok(())
}

#[test]
fn server_close_is_reported_once() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::CloseImmediately);
    let pool = pool();
    let (_client, mut events) = pool.connect_channel(&format!("ws://127.0.0.1:{port}/"))?;
    expect_open(&mut events);

    match next_event(&mut events, WAIT) {
        Some(ConnectionEvent::Close { code, reason, .. }) => {
            assert_eq!(code, 1001);
            assert_eq!(reason, "bye");
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert!(next_event(&mut events, Duration::from_millis(200)).is_none());
    Ok(())
}

#[test]
fn rejected_handshake_fails_without_open() -> anyhow::Result<()> {
    let server = http_server(|_| response("404 Not Found", &[], b"nope"));
    let pool = pool();
    let (_client, mut events) =
        pool.connect_channel(&format!("ws://127.0.0.1:{}/", server.port))?;

    match next_event(&mut events, WAIT) {
        Some(ConnectionEvent::Failed { error, .. }) => {
            assert!(matches!(error, Error::HandshakeRejected { .. }), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn many_connections_share_one_loop() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let url = format!("ws://127.0.0.1:{port}/");

    let mut connections = Vec::new();
    for _ in 0..10 {
        connections.push(pool.connect_channel(&url)?);
    }
    assert_eq!(pool.live_count(), 10);

    for (index, (client, events)) in connections.iter_mut().enumerate() {
        expect_open(events);
        client.send_text(&format!("msg-{index}"))?;
    }
    for (index, (_, events)) in connections.iter_mut().enumerate() {
        assert_eq!(expect_message(events).0, format!("msg-{index}").into_bytes());
    }

    drop(connections);
    assert_eq!(pool.live_count(), 0);
    assert!(!pool.is_running());
    assert_eq!(pool.slots_used(), 10);
    Ok(())
}

#[test]
fn pool_restarts_after_going_idle() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let url = format!("ws://127.0.0.1:{port}/");

    let (client, mut events) = pool.connect_channel(&url)?;
    expect_open(&mut events);
    drop(client);
    assert!(!pool.is_running());

    let (client, mut events) = pool.connect_channel(&url)?;
    expect_open(&mut events);
    client.send_text("again")?;
    assert_eq!(expect_message(&mut events).0, b"again");
    assert_eq!(client.id().index(), 1);
    Ok(())
}

#[test]
fn exhausted_pool_leaves_live_connections_working() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    common::init_tracing();
    let pool = ConnectionPool::new(PoolConfig::default().with_capacity(100));
    let url = format!("ws://127.0.0.1:{port}/");
    let dead = format!("ws://127.0.0.1:{}/", dead_port());

    let mut live = Vec::new();
    for _ in 0..10 {
        live.push(pool.connect_channel(&url)?);
    }
    let _failing = (0..90)
        .map(|_| pool.connect_channel(&dead))
        .collect::<wspool::Result<Vec<_>>>()?;
    for (_, events) in &mut live {
        expect_open(events);
    }

    assert!(matches!(
        pool.connect_channel(&url),
        Err(Error::ResourceExhausted { capacity: 100 })
    ));
    assert_eq!(pool.live_count(), 100);

    for (index, (client, events)) in live.iter_mut().enumerate() {
        client.send_text(&format!("still-{index}"))?;
        assert_eq!(expect_message(events).0, format!("still-{index}").into_bytes());
    }
    Ok(())
}

#[test]
fn handler_dropping_its_own_client_stops_the_loop() -> anyhow::Result<()> {
    let port = ws_server(WsBehavior::Echo);
    let pool = pool();
    let url = format!("ws://127.0.0.1:{port}/");

    let seen = connect_dropping_on_open(&pool, &url)?;
    assert!(eventually(|| !pool.is_running()));
    assert_eq!(pool.live_count(), 0);

    // The next connection starts a fresh loop and joins the retired one.
    let (client, mut events) = pool.connect_channel(&url)?;
    assert!(pool.is_running());
    expect_open(&mut events);
    client.send_text("after")?;
    assert_eq!(expect_message(&mut events).0, b"after");
    assert_eq!(client.id().index(), 1);

    assert_eq!(*seen.lock(), ["open"]);
    Ok(())
}

#[test]
fn events_behind_a_self_drop_are_not_delivered() -> anyhow::Result<()> {
    // Upgrade response and a text frame in a single write, then EOF.
    let server = http_server(|_| {
        let mut bytes = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\nConnection: Upgrade\r\n\r\n"
            .to_vec();
        bytes.extend_from_slice(&[0x81, 0x04]);
        bytes.extend_from_slice(b"late");
        bytes
    });
    let pool = pool();

    let seen = connect_dropping_on_open(&pool, &format!("ws://127.0.0.1:{}/", server.port))?;
    assert!(eventually(|| !pool.is_running()));
    assert_eq!(pool.live_count(), 0);

    // Starting again joins the retired loop, so its queued work is done.
    let (_next, _events) = pool.connect_channel(&format!("ws://127.0.0.1:{}/", dead_port()))?;
    assert_eq!(*seen.lock(), ["open"]);
    Ok(())
}

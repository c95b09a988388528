//! Single-thread readiness multiplexer for a [`ConnectionPool`](super::ConnectionPool).
//!
//! One OS thread per pool runs a current-thread tokio runtime with a single
//! task. Each iteration:
//!
//! 1. drains the command queue, handing sends to the addressed session
//! 2. waits once for readiness across the queue, every socket and a sleep
//!    to the earliest session deadline
//! 3. flushes writable sockets and feeds read bytes to their sessions
//! 4. sweeps timers (handshake, ping, pong, close)
//!
//! All slot mutation happens here. Other threads only enqueue
//! [`PoolCommand`]s.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::SyncSender;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Sleep;
use tracing::{debug, error, trace, warn};

use crate::config::PoolConfig;
use crate::error::Error;
use crate::identifiers::ConnectionId;
use crate::protocol::{OpCode, UpgradeRequest};
use crate::transport::{Connector, IoReport, Socket};

use super::handler::WebSocketHandler;
use super::session::{CLOSE_GOING_AWAY, Session, SessionEvent, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Wait used when no session has a pending deadline.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Loop thread name.
const THREAD_NAME: &str = "wspool-ws-loop";

// ============================================================================
// PoolCommand
// ============================================================================

/// Work handed from caller threads to the loop thread.
pub(crate) enum PoolCommand {
    /// Create a session in slot `id`.
    Open {
        id: ConnectionId,
        request: UpgradeRequest,
        handler: Box<dyn WebSocketHandler>,
        status: Arc<SlotStatus>,
    },
    /// Send a message.
    Send {
        id: ConnectionId,
        payload: Bytes,
        opcode: OpCode,
    },
    /// Send a ping.
    Ping { id: ConnectionId, payload: Bytes },
    /// Start the close handshake.
    Close {
        id: ConnectionId,
        code: u16,
        reason: String,
    },
    /// Drop the slot. `ack` is signalled once the slot is gone.
    Remove {
        id: ConnectionId,
        ack: Option<SyncSender<()>>,
    },
    /// Finish the queued work and exit.
    Shutdown,
}

// ============================================================================
// Slot
// ============================================================================

/// Status shared between a client handle and its slot.
#[derive(Debug)]
pub(crate) struct SlotStatus {
    state: AtomicU8,
    removed: AtomicBool,
}

impl SlotStatus {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
            removed: AtomicBool::new(false),
        }
    }

    /// Last state published by the loop.
    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn publish(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Silences the slot ahead of its `Remove` command.
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

struct Slot {
    session: Session,
    socket: Socket,
    handler: Box<dyn WebSocketHandler>,
    status: Arc<SlotStatus>,
}

// ============================================================================
// EventLoop
// ============================================================================

pub(crate) struct EventLoop {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    rx: mpsc::UnboundedReceiver<PoolCommand>,
    inbox: VecDeque<PoolCommand>,
    slots: Vec<Option<Slot>>,
    stopping: bool,
    disconnected: bool,
}

impl EventLoop {
    /// Starts a loop thread consuming `rx`.
    pub(crate) fn spawn(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        rx: mpsc::UnboundedReceiver<PoolCommand>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "Failed to build event loop runtime");
                        run_degraded(rx, &e.to_string());
                        return;
                    }
                };
                runtime.block_on(Self::new(config, connector, rx).run());
            })
    }

    fn new(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        rx: mpsc::UnboundedReceiver<PoolCommand>,
    ) -> Self {
        Self {
            config,
            connector,
            rx,
            inbox: VecDeque::new(),
            slots: Vec::new(),
            stopping: false,
            disconnected: false,
        }
    }

    async fn run(mut self) {
        debug!("Event loop started");

        let sleep = tokio::time::sleep(IDLE_WAIT);
        tokio::pin!(sleep);

        loop {
            self.drain_commands();
            if self.stopping || self.disconnected {
                break;
            }

            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            sleep.as_mut().reset(tokio::time::Instant::from_std(deadline));

            let reports = poll_fn(|cx| self.poll_ready(cx, sleep.as_mut())).await;
            for (index, report) in reports {
                self.handle_io(index, report);
            }

            self.sweep(Instant::now());
        }

        self.close_all();
        debug!("Event loop terminated");
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    /// Completes when a command, socket event or deadline is ready.
    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
        sleep: Pin<&mut Sleep>,
    ) -> Poll<Vec<(usize, IoReport)>> {
        let mut woke = false;

        while !self.disconnected {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(command)) => {
                    self.inbox.push_back(command);
                    woke = true;
                }
                Poll::Ready(None) => {
                    self.disconnected = true;
                    woke = true;
                }
                Poll::Pending => break,
            }
        }

        let mut reports = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                let report = slot.socket.poll_io(cx);
                if !report.is_idle() {
                    reports.push((index, report));
                }
            }
        }

        if sleep.poll(cx).is_ready() {
            woke = true;
        }

        if woke || !reports.is_empty() {
            Poll::Ready(reports)
        } else {
            Poll::Pending
        }
    }

    fn handle_io(&mut self, index: usize, report: IoReport) {
        let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };
        let now = Instant::now();

        if report.connected {
            slot.session.on_transport_connected();
        }
        let inbound = slot.socket.take_inbound();
        if !inbound.is_empty() {
            trace!(id = index, len = inbound.len(), "Bytes received");
            slot.session.receive(&inbound, now);
        }
        if let Some(e) = report.error {
            slot.session.on_transport_error(e);
        } else if report.eof {
            slot.session.on_eof();
        }

        self.pump(index);
    }

    fn sweep(&mut self, now: Instant) {
        for index in 0..self.slots.len() {
            if let Some(slot) = self.slots[index].as_mut() {
                slot.session.poll_timers(now);
                self.pump(index);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|slot| slot.session.next_deadline())
            .min()
    }

    /// Moves session output to the socket and runs callbacks.
    fn pump(&mut self, index: usize) {
        let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };

        if slot.session.has_outbound() {
            let outbound = slot.session.take_outbound();
            slot.socket.queue(&outbound);
        }

        let state = slot.session.state();
        slot.status.publish(state);

        let id = ConnectionId::from_index(index);
        for event in slot.session.take_events() {
            // A callback may have dropped the client; the rest of the batch
            // belongs to a removed connection.
            if slot.status.is_removed() {
                trace!(%id, "Events dropped for removed connection");
                break;
            }
            match event {
                SessionEvent::Opened => slot.handler.on_open(id),
                SessionEvent::Message { opcode, payload } => {
                    slot.handler.on_message(id, &payload, opcode);
                }
                SessionEvent::Closed { code, reason } => slot.handler.on_close(id, code, &reason),
                SessionEvent::Failed(error) => slot.handler.on_failed(id, error),
            }
        }

        if state == SessionState::Closed && !slot.socket.is_closed() {
            slot.socket.flush_and_close();
            debug!(%id, "Socket closed");
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn drain_commands(&mut self) {
        loop {
            let command = match self.inbox.pop_front() {
                Some(command) => command,
                None => match self.rx.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.disconnected = true;
                        break;
                    }
                },
            };
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Open {
                id,
                request,
                handler,
                status,
            } => self.open(id, request, handler, status),
            PoolCommand::Send {
                id,
                payload,
                opcode,
            } => {
                if let Some(slot) = self.slot_mut(id) {
                    if let Err(e) = slot.session.send(payload, opcode) {
                        warn!(%id, error = %e, "Send dropped");
                    }
                    self.pump(id.index());
                }
            }
            PoolCommand::Ping { id, payload } => {
                if let Some(slot) = self.slot_mut(id) {
                    if let Err(e) = slot.session.ping(&payload, Instant::now()) {
                        debug!(%id, error = %e, "Ping dropped");
                    }
                    self.pump(id.index());
                }
            }
            PoolCommand::Close { id, code, reason } => {
                if let Some(slot) = self.slot_mut(id) {
                    slot.session.close(code, &reason, Instant::now());
                    self.pump(id.index());
                }
            }
            PoolCommand::Remove { id, ack } => {
                self.remove(id);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            PoolCommand::Shutdown => {
                debug!("Shutdown command received");
                self.stopping = true;
            }
        }
    }

    fn slot_mut(&mut self, id: ConnectionId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(id.index()).and_then(Option::as_mut);
        if slot.is_none() {
            warn!(%id, "Command for unknown connection");
        }
        slot
    }

    fn open(
        &mut self,
        id: ConnectionId,
        request: UpgradeRequest,
        handler: Box<dyn WebSocketHandler>,
        status: Arc<SlotStatus>,
    ) {
        let connect = self.connector.connect(&request.endpoint);
        let socket = Socket::connecting(connect, self.config.read_chunk);

        debug!(
            %id,
            host = %request.endpoint.host,
            port = request.endpoint.port,
            "Connection slot created"
        );
        let session = Session::new(request, self.config.clone(), Instant::now());

        let index = id.index();
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(Slot {
            session,
            socket,
            handler,
            status,
        });
    }

    fn remove(&mut self, id: ConnectionId) {
        let Some(mut slot) = self.slots.get_mut(id.index()).and_then(Option::take) else {
            return;
        };

        if slot.session.state() == SessionState::Connected {
            slot.session
                .close(CLOSE_GOING_AWAY, "client removed", Instant::now());
            let outbound = slot.session.take_outbound();
            slot.socket.queue(&outbound);
        }
        slot.socket.flush_and_close();
        slot.status.publish(SessionState::Closed);

        debug!(%id, "Connection removed");
    }

    fn close_all(&mut self) {
        let live: Vec<ConnectionId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ConnectionId::from_index(index))
            .collect();

        if !live.is_empty() {
            debug!(count = live.len(), "Closing connections on shutdown");
        }
        for id in live {
            self.remove(id);
        }
    }
}

// ============================================================================
// Degraded Mode
// ============================================================================

/// Serves commands without I/O when the runtime cannot be built.
///
/// Every open fails immediately so callers still see exactly one
/// `on_failed` per attempt, and removals are acknowledged.
fn run_degraded(mut rx: mpsc::UnboundedReceiver<PoolCommand>, reason: &str) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            PoolCommand::Open {
                id,
                mut handler,
                status,
                ..
            } => {
                status.publish(SessionState::Closed);
                handler.on_failed(id, Error::connect(format!("event loop unavailable: {reason}")));
            }
            PoolCommand::Remove { ack: Some(ack), .. } => {
                let _ = ack.send(());
            }
            PoolCommand::Shutdown => break,
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

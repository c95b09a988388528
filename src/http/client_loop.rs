//! Loop thread driving every in-flight HTTP request of one client pool.
//!
//! Same shape as the WebSocket multiplexer: one thread, one current-thread
//! runtime, one readiness wait per iteration over the submission queue,
//! every request's socket, every reply channel (for cancellation) and a
//! sleep to the earliest exchange deadline.
//!
//! The loop retires itself when nothing is in flight. The emptiness check
//! happens under the lifecycle mutex that submitters hold while enqueueing,
//! so a request is either seen by this loop or starts a new one.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tokio::time::Sleep;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::transport::{IoReport, Socket};

use super::exchange::{Exchange, ExchangeState, Step};
use super::pool::HttpShared;
use super::response::HttpResponse;

// ============================================================================
// Constants
// ============================================================================

/// Wait used when nothing has a deadline.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Loop thread name.
const THREAD_NAME: &str = "wspool-http-loop";

// ============================================================================
// Types
// ============================================================================

/// Reply channel of one request.
pub(crate) type ReplySender = oneshot::Sender<Result<HttpResponse>>;

/// A request handed to the loop.
pub(crate) struct Submission {
    pub(crate) id: RequestId,
    pub(crate) exchange: Exchange,
    pub(crate) reply: ReplySender,
}

struct InFlight {
    exchange: Exchange,
    socket: Option<Socket>,
    reply: ReplySender,
}

// ============================================================================
// ClientLoop
// ============================================================================

pub(crate) struct ClientLoop {
    shared: Arc<HttpShared>,
    rx: mpsc::UnboundedReceiver<Submission>,
    inbox: VecDeque<Submission>,
    inflight: FxHashMap<RequestId, InFlight>,
    disconnected: bool,
}

impl ClientLoop {
    /// Starts a loop thread consuming `rx`.
    pub(crate) fn spawn(
        shared: Arc<HttpShared>,
        rx: mpsc::UnboundedReceiver<Submission>,
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
                        error!(error = %e, "Failed to build HTTP loop runtime");
                        run_degraded(&shared, rx, &e.to_string());
                        return;
                    }
                };
                runtime.block_on(Self::new(shared, rx).run());
            })
    }

    fn new(shared: Arc<HttpShared>, rx: mpsc::UnboundedReceiver<Submission>) -> Self {
        Self {
            shared,
            rx,
            inbox: VecDeque::new(),
            inflight: FxHashMap::default(),
            disconnected: false,
        }
    }

    async fn run(mut self) {
        debug!("HTTP loop started");

        let sleep = tokio::time::sleep(IDLE_WAIT);
        tokio::pin!(sleep);

        loop {
            self.drain_submissions();
            if self.disconnected {
                break;
            }
            if self.inflight.is_empty() && self.try_retire() {
                debug!("HTTP loop idle, exiting");
                return;
            }
            if !self.inbox.is_empty() {
                continue;
            }

            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            sleep.as_mut().reset(tokio::time::Instant::from_std(deadline));

            let reports = poll_fn(|cx| self.poll_ready(cx, sleep.as_mut())).await;
            let now = Instant::now();
            for (id, report) in reports {
                self.handle_io(id, report, now);
            }

            self.sweep(Instant::now());
        }

        self.fail_all();
        debug!("HTTP loop terminated");
    }

    /// Clears the pool's sender if no submission is queued.
    fn try_retire(&mut self) -> bool {
        let mut lifecycle = self.shared.lifecycle.lock();
        match self.rx.try_recv() {
            Ok(submission) => {
                self.inbox.push_back(submission);
                false
            }
            Err(TryRecvError::Empty) => {
                lifecycle.tx = None;
                true
            }
            Err(TryRecvError::Disconnected) => true,
        }
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
        sleep: Pin<&mut Sleep>,
    ) -> Poll<Vec<(RequestId, IoReport)>> {
        let mut woke = false;

        while !self.disconnected {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(submission)) => {
                    self.inbox.push_back(submission);
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
        for (id, flight) in &mut self.inflight {
            if flight.reply.poll_closed(cx).is_ready() {
                woke = true;
            }
            if let Some(socket) = flight.socket.as_mut() {
                let report = socket.poll_io(cx);
                if !report.is_idle() {
                    reports.push((*id, report));
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

    fn handle_io(&mut self, id: RequestId, report: IoReport, now: Instant) {
        let Some(flight) = self.inflight.get_mut(&id) else {
            return;
        };
        let step = apply_report(flight, report, now);
        self.advance(id, step, now);
    }

    fn sweep(&mut self, now: Instant) {
        let ids: Vec<RequestId> = self.inflight.keys().copied().collect();
        for id in ids {
            let Some(flight) = self.inflight.get_mut(&id) else {
                continue;
            };
            if flight.reply.is_closed() {
                debug!(request_id = %id, "HTTP request cancelled");
                self.forget(id);
                continue;
            }
            if let Some(step) = flight.exchange.check_deadline(now) {
                self.advance(id, step, now);
                continue;
            }
            self.connect_if_ready(id, now);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.inflight
            .values()
            .filter_map(|flight| flight.exchange.next_deadline())
            .min()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn drain_submissions(&mut self) {
        loop {
            let submission = match self.inbox.pop_front() {
                Some(submission) => submission,
                None => match self.rx.try_recv() {
                    Ok(submission) => submission,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.disconnected = true;
                        break;
                    }
                },
            };

            let Submission {
                id,
                exchange,
                reply,
            } = submission;
            trace!(request_id = %id, url = %exchange.url(), "HTTP request accepted");
            self.inflight.insert(
                id,
                InFlight {
                    exchange,
                    socket: None,
                    reply,
                },
            );
            self.connect_if_ready(id, Instant::now());
        }
    }

    fn advance(&mut self, id: RequestId, step: Step, now: Instant) {
        match step {
            Step::Continue => {}
            Step::Reconnect => {
                if let Some(flight) = self.inflight.get_mut(&id)
                    && let Some(mut socket) = flight.socket.take()
                {
                    socket.close();
                }
                self.connect_if_ready(id, now);
            }
            Step::Settle(result) => self.settle(id, result),
        }
    }

    fn connect_if_ready(&mut self, id: RequestId, now: Instant) {
        let Some(flight) = self.inflight.get_mut(&id) else {
            return;
        };
        if flight.socket.is_some() || !flight.exchange.ready_to_connect(now) {
            return;
        }

        flight.exchange.on_connect_started();
        let endpoint = flight.exchange.endpoint();
        debug!(
            request_id = %id,
            host = %endpoint.host,
            port = endpoint.port,
            attempt = flight.exchange.attempts(),
            "HTTP connecting"
        );
        let connect = self.shared.connector.connect(endpoint);
        flight.socket = Some(Socket::connecting(connect, self.shared.config.read_chunk));
    }

    fn settle(&mut self, id: RequestId, result: Result<HttpResponse>) {
        let Some(flight) = self.take(id) else {
            return;
        };
        match &result {
            Ok(response) => debug!(
                request_id = %id,
                status = response.status_code,
                bytes = response.body.len(),
                "HTTP request completed"
            ),
            Err(e) => debug!(request_id = %id, error = %e, "HTTP request failed"),
        }
        let _ = flight.reply.send(result);
    }

    fn forget(&mut self, id: RequestId) {
        self.take(id);
    }

    fn take(&mut self, id: RequestId) -> Option<InFlight> {
        let mut flight = self.inflight.remove(&id)?;
        if let Some(socket) = flight.socket.as_mut() {
            socket.close();
        }
        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
        Some(flight)
    }

    fn fail_all(&mut self) {
        let ids: Vec<RequestId> = self.inflight.keys().copied().collect();
        if !ids.is_empty() {
            debug!(count = ids.len(), "Failing in-flight HTTP requests on shutdown");
        }
        for id in ids {
            self.settle(id, Err(Error::ConnectionClosed));
        }
        for submission in self.inbox.drain(..) {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            let _ = submission.reply.send(Err(Error::ConnectionClosed));
        }
    }
}

/// Feeds one socket report to its exchange.
fn apply_report(flight: &mut InFlight, report: IoReport, now: Instant) -> Step {
    let Some(socket) = flight.socket.as_mut() else {
        return Step::Continue;
    };
    let exchange = &mut flight.exchange;

    if report.connected {
        exchange.on_connected();
        socket.queue(&exchange.take_outbound());
        socket.shutdown_write();
    }

    let inbound = socket.take_inbound();
    if !inbound.is_empty() {
        match exchange.on_data(&inbound) {
            Step::Continue => {}
            step => return step,
        }
    }

    if let Some(e) = report.error {
        if exchange.state() == ExchangeState::Connecting {
            return exchange.on_connect_failed(&e, now);
        }
        return exchange.on_io_error(e);
    }
    if report.eof {
        return exchange.on_eof();
    }
    Step::Continue
}

// ============================================================================
// Degraded Mode
// ============================================================================

/// Fails every submission when the runtime cannot be built.
fn run_degraded(shared: &HttpShared, mut rx: mpsc::UnboundedReceiver<Submission>, reason: &str) {
    while let Some(submission) = rx.blocking_recv() {
        shared.pending.fetch_sub(1, Ordering::AcqRel);
        let _ = submission
            .reply
            .send(Err(Error::connect(format!("HTTP loop unavailable: {reason}"))));
    }
}

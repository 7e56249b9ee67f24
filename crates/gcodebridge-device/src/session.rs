//! Device session
//!
//! Owns the serial channel and exposes one operation to the rest of the
//! system: [`DeviceSession::submit`]. Submissions traverse a bounded queue
//! drained by a single dispatcher task, which enforces the one-in-flight
//! discipline: for each command it notifies the trigger engine, fires the
//! `gcode-sent` hook, writes the line, waits for the terminal response,
//! fires `response-received`, and only then considers the next command.
//!
//! A timer task injects `?` liveness probes through the same dispatcher, so
//! a probe can be interleaved between two commands but never between a
//! command's write and its terminal response.

use crate::response::{status_state, ResponseClass};
use crate::transport::LineTransport;
use gcodebridge_core::{HandlerChain, SessionError};
use gcodebridge_triggers::TriggerEngine;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the internal device-line queue
const RESPONSE_QUEUE_SIZE: usize = 1000;

/// How long `stop` waits for the dispatcher and its helper tasks
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Synthetic terminal delivered when a command's deadline expires
const TIMEOUT_RESPONSE: &str = "error:timeout";

/// A single GCode line on its way to the device
#[derive(Debug, Clone)]
pub struct Command {
    /// The line, non-empty, trailing newline stripped
    pub line: String,
    /// Address of the originating client
    pub client: SocketAddr,
    /// Monotonic submission counter, for logging and test assertions only
    pub seq: u64,
}

/// The device's answer to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Informational lines read while the command was in flight
    pub preamble: Vec<String>,
    /// The terminal line (`ok`, `error:*`, `ALARM:*`, or a status frame)
    pub terminal: String,
}

/// Tuning knobs for the session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Submission queue capacity
    pub queue_limit: usize,
    /// Per-command response deadline
    pub response_timeout: Duration,
    /// Probe interval; zero disables the prober
    pub liveness_period: Duration,
    /// Suppress `ok` responses produced by `?` probes
    pub swallow_realtime_ok: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_limit: 50,
            response_timeout: Duration::from_millis(5000),
            liveness_period: Duration::from_millis(1000),
            swallow_realtime_ok: true,
        }
    }
}

struct Submission {
    command: Command,
    reply: oneshot::Sender<Result<Response, SessionError>>,
}

#[derive(Default)]
struct SessionState {
    unhealthy: bool,
    last_status: Option<String>,
}

/// Handle to the running device session
pub struct DeviceSession {
    submit_tx: mpsc::Sender<Submission>,
    running_tx: Arc<watch::Sender<bool>>,
    state: Arc<RwLock<SessionState>>,
    seq: AtomicU64,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn LineTransport>,
    // Keeps the probe channel open even when the prober is disabled.
    _probe_tx: mpsc::Sender<()>,
}

impl DeviceSession {
    /// Start the session over an open transport
    ///
    /// Spawns the blocking reader, the dispatcher, and the liveness prober.
    pub fn start(
        transport: Arc<dyn LineTransport>,
        engine: Arc<TriggerEngine>,
        handlers: Arc<HandlerChain>,
        config: SessionConfig,
    ) -> Self {
        let (submit_tx, submit_rx) = mpsc::channel(config.queue_limit);
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let (line_tx, line_rx) = mpsc::channel(RESPONSE_QUEUE_SIZE);
        let (running_tx, _) = watch::channel(true);
        let running_tx = Arc::new(running_tx);
        let state = Arc::new(RwLock::new(SessionState::default()));

        let reader = {
            let transport = transport.clone();
            tokio::task::spawn_blocking(move || read_loop(transport, line_tx))
        };

        let dispatcher = Dispatcher {
            transport: transport.clone(),
            engine,
            handlers,
            config: config.clone(),
            line_rx,
            submit_rx,
            probe_rx,
            running_tx: running_tx.clone(),
            state: state.clone(),
            skippable_oks: 0,
            expect_late_terminal: false,
        };
        let dispatcher = tokio::spawn(dispatcher.run());

        let liveness = tokio::spawn(liveness_loop(
            config.liveness_period,
            probe_tx.clone(),
            running_tx.subscribe(),
        ));

        Self {
            submit_tx,
            running_tx,
            state,
            seq: AtomicU64::new(0),
            tasks: parking_lot::Mutex::new(vec![dispatcher, liveness, reader]),
            transport,
            _probe_tx: probe_tx,
        }
    }

    /// Submit one command and wait for its response
    ///
    /// Blocks while the submission queue is full, providing per-client
    /// backpressure. A command that times out at the device resolves to a
    /// normal [`Response`] carrying the synthetic `error:timeout` terminal.
    pub async fn submit(
        &self,
        line: String,
        client: SocketAddr,
    ) -> Result<Response, SessionError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let submission = Submission {
            command: Command { line, client, seq },
            reply: reply_tx,
        };

        self.submit_tx
            .send(submission)
            .await
            .map_err(|_| SessionError::ServiceStopped)?;

        reply_rx.await.map_err(|_| SessionError::ServiceStopped)?
    }

    /// Whether the device answered its most recent probe in time
    pub fn is_healthy(&self) -> bool {
        !self.state.read().unhealthy
    }

    /// The last status report read from the device, if any
    pub fn last_status(&self) -> Option<String> {
        self.state.read().last_status.clone()
    }

    /// A watch that flips to `false` once the session has ended
    ///
    /// Ends on [`DeviceSession::stop`] or when the transport closes
    /// underneath the dispatcher.
    pub fn running(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    /// Stop the session
    ///
    /// Refuses new submissions, lets the in-flight command finish or time
    /// out, surfaces `ServiceStopped` to queued submitters, cancels the
    /// prober and closes the transport. Bounded by a small grace period.
    pub async fn stop(&self) {
        self.running_tx.send_replace(false);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("Device session task did not stop within {:?}", STOP_GRACE);
            }
        }

        // Normally closed by the dispatcher on its way out; close again in
        // case the dispatcher was aborted by the grace period.
        self.transport.close();
    }
}

/// Blocking loop feeding device lines into the dispatcher's queue.
fn read_loop(transport: Arc<dyn LineTransport>, line_tx: mpsc::Sender<String>) {
    loop {
        match transport.read_line() {
            Ok(line) => {
                trace!("Device line: {:?}", line);
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(gcodebridge_core::TransportError::Closed) => break,
            Err(e) => {
                error!("Serial read failed: {}", e);
                break;
            }
        }
    }
    debug!("Device read loop stopped");
}

/// Timer loop requesting a probe once per period.
async fn liveness_loop(
    period: Duration,
    probe_tx: mpsc::Sender<()>,
    mut running_rx: watch::Receiver<bool>,
) {
    if period.is_zero() {
        info!("Device liveness probing disabled (liveness-period is 0)");
        return;
    }

    info!(
        "Device liveness probing started (period: {}ms)",
        period.as_millis()
    );

    loop {
        tokio::select! {
            changed = running_rx.changed() => {
                if changed.is_err() || !*running_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(period) => {
                // A full channel means a probe is already pending; skip.
                let _ = probe_tx.try_send(());
            }
        }
    }

    debug!("Device liveness probing stopped");
}

enum Waited {
    Terminal { preamble: Vec<String>, terminal: String },
    TimedOut { preamble: Vec<String> },
    Closed,
}

struct Dispatcher {
    transport: Arc<dyn LineTransport>,
    engine: Arc<TriggerEngine>,
    handlers: Arc<HandlerChain>,
    config: SessionConfig,
    line_rx: mpsc::Receiver<String>,
    submit_rx: mpsc::Receiver<Submission>,
    probe_rx: mpsc::Receiver<()>,
    running_tx: Arc<watch::Sender<bool>>,
    state: Arc<RwLock<SessionState>>,
    skippable_oks: u32,
    expect_late_terminal: bool,
}

impl Dispatcher {
    async fn run(mut self) {
        info!("Device dispatcher started");
        let mut running_rx = self.running_tx.subscribe();
        let mut closed = false;

        loop {
            tokio::select! {
                biased;
                changed = running_rx.changed() => {
                    if changed.is_err() || !*running_rx.borrow() {
                        break;
                    }
                }
                Some(()) = self.probe_rx.recv() => {
                    if self.handle_probe().await.is_err() {
                        closed = true;
                        break;
                    }
                }
                submission = self.submit_rx.recv() => match submission {
                    Some(submission) => {
                        if self.handle_command(submission).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    None => break,
                },
                line = self.line_rx.recv() => match line {
                    // Unsolicited traffic between commands: late probe `ok`s,
                    // status frames, alarms, banner text.
                    Some(line) => self.handle_idle_line(&line),
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        // Refuse new submissions and fail the ones already queued.
        self.submit_rx.close();
        let leftover = if closed {
            SessionError::TransportClosed
        } else {
            SessionError::ServiceStopped
        };
        while let Ok(submission) = self.submit_rx.try_recv() {
            let _ = submission.reply.send(Err(leftover.clone()));
        }

        self.transport.close();
        self.running_tx.send_replace(false);
        info!("Device dispatcher stopped");
    }

    /// Process one client command through the one-in-flight pipeline.
    ///
    /// Returns `Err(())` when the transport is gone and the dispatcher
    /// should wind down.
    async fn handle_command(&mut self, submission: Submission) -> Result<(), ()> {
        let Submission { command, reply } = submission;
        self.drain_buffered_lines();

        let is_status_query = command.line.trim() == "?";
        let fired = self.engine.evaluate(&command.line);
        if fired > 0 {
            debug!(seq = command.seq, "{} trigger(s) fired for {:?}", fired, command.line);
        }

        self.handlers.gcode_sent(&command.line, command.client).await;

        if let Err(e) = self.transport.write_line(&command.line) {
            warn!(seq = command.seq, "Serial write failed: {}", e);
            let _ = reply.send(Err(SessionError::TransportClosed));
            return Err(());
        }
        trace!(seq = command.seq, client = %command.client, "Sent: {}", command.line);

        if is_status_query && self.config.swallow_realtime_ok {
            self.skippable_oks += 1;
        }

        match self
            .await_terminal(self.config.response_timeout, is_status_query)
            .await
        {
            Waited::Terminal { preamble, terminal } => {
                let terminal = self
                    .handlers
                    .response_received(&terminal, &command.line, command.client)
                    .await;
                let _ = reply.send(Ok(Response { preamble, terminal }));
                Ok(())
            }
            Waited::TimedOut { preamble } => {
                warn!(
                    seq = command.seq,
                    "No response within {:?} for {:?}", self.config.response_timeout, command.line
                );
                let terminal = self
                    .handlers
                    .response_received(TIMEOUT_RESPONSE, &command.line, command.client)
                    .await;
                let _ = reply.send(Ok(Response { preamble, terminal }));
                Ok(())
            }
            Waited::Closed => {
                let _ = reply.send(Err(SessionError::TransportClosed));
                Err(())
            }
        }
    }

    /// Inject one liveness probe and consume its status frame internally.
    async fn handle_probe(&mut self) -> Result<(), ()> {
        self.drain_buffered_lines();

        if let Err(e) = self.transport.write_line("?") {
            warn!("Serial write failed for liveness probe: {}", e);
            return Err(());
        }
        if self.config.swallow_realtime_ok {
            self.skippable_oks += 1;
        }

        let deadline = 2 * self.config.liveness_period;
        match self.await_terminal(deadline, true).await {
            Waited::Terminal { .. } => {
                let was_unhealthy = {
                    let mut state = self.state.write();
                    std::mem::replace(&mut state.unhealthy, false)
                };
                if was_unhealthy {
                    info!("Device is responding to liveness probes again");
                }
                Ok(())
            }
            Waited::TimedOut { .. } => {
                self.state.write().unhealthy = true;
                warn!(
                    "Device did not answer liveness probe within {:?}; continuing",
                    deadline
                );
                Ok(())
            }
            Waited::Closed => Err(()),
        }
    }

    /// Wait for the terminal frame of the in-flight command.
    ///
    /// `status_terminated` marks probes and client status queries, whose
    /// terminal is the next `<...>` frame instead of `ok`/`error`.
    ///
    /// An `ok`/`error`/`ALARM` arriving while a late-terminal expectation is
    /// armed belongs to the previously timed-out command and is consumed
    /// here instead of being accepted as the current command's terminal.
    async fn await_terminal(&mut self, deadline: Duration, status_terminated: bool) -> Waited {
        let until = Instant::now() + deadline;
        let mut preamble = Vec::new();
        let mut absorbed_late = false;

        loop {
            let line = match tokio::time::timeout_at(until, self.line_rx.recv()).await {
                Err(_) => {
                    if !status_terminated && !absorbed_late {
                        self.expect_late_terminal = true;
                    }
                    return Waited::TimedOut { preamble };
                }
                Ok(None) => return Waited::Closed,
                Ok(Some(line)) => line,
            };

            match ResponseClass::classify(&line) {
                ResponseClass::Ack => {
                    if self.skippable_oks > 0 {
                        // The `ok` trailing a `?` on firmwares that emit one.
                        self.skippable_oks -= 1;
                        trace!("Swallowed realtime ok ({} credits left)", self.skippable_oks);
                    } else if self.expect_late_terminal {
                        self.expect_late_terminal = false;
                        absorbed_late = true;
                        debug!("Discarding late terminal of a timed-out command");
                    } else if !status_terminated {
                        return Waited::Terminal {
                            preamble,
                            terminal: line,
                        };
                    } else {
                        debug!("Dropping stray ok while waiting for a status frame");
                    }
                }
                ResponseClass::Error | ResponseClass::Alarm => {
                    if self.expect_late_terminal {
                        self.expect_late_terminal = false;
                        absorbed_late = true;
                        debug!("Discarding late error of a timed-out command: {}", line);
                    } else if !status_terminated {
                        return Waited::Terminal {
                            preamble,
                            terminal: line,
                        };
                    } else {
                        // Out-of-band failure while a status query is in flight.
                        warn!("Device error while awaiting status frame: {}", line);
                    }
                }
                ResponseClass::StatusReport => {
                    self.update_status(&line);
                    if status_terminated {
                        return Waited::Terminal {
                            preamble,
                            terminal: line,
                        };
                    }
                    trace!("Out-of-band status report: {}", line);
                }
                ResponseClass::Informational => {
                    debug!("Informational line from device: {}", line);
                    preamble.push(line);
                }
            }
        }
    }

    /// Dispose of device lines buffered between commands.
    ///
    /// Probe-`ok` credits apply only to lines that are already buffered
    /// here; afterwards they are reset so they can never consume a future
    /// command's acknowledgement. The late-terminal expectation of a
    /// timed-out command persists until a terminal absorbs it, including
    /// during the next command's flight.
    fn drain_buffered_lines(&mut self) {
        while let Ok(line) = self.line_rx.try_recv() {
            self.handle_idle_line(&line);
        }
        self.skippable_oks = 0;
    }

    /// Dispose of one device line read with no command in flight.
    fn handle_idle_line(&mut self, line: &str) {
        match ResponseClass::classify(line) {
            ResponseClass::Ack => {
                if self.skippable_oks > 0 {
                    self.skippable_oks -= 1;
                    trace!("Swallowed realtime ok ({} credits left)", self.skippable_oks);
                } else if self.expect_late_terminal {
                    self.expect_late_terminal = false;
                    debug!("Discarding late terminal of a timed-out command");
                } else {
                    debug!("Dropping unexpected ok with no command in flight");
                }
            }
            ResponseClass::Error | ResponseClass::Alarm => {
                if self.expect_late_terminal {
                    self.expect_late_terminal = false;
                    debug!("Discarding late error of a timed-out command: {}", line);
                } else {
                    warn!("Unsolicited device error: {}", line);
                }
            }
            ResponseClass::StatusReport => self.update_status(line),
            ResponseClass::Informational => {
                debug!("Dropping informational line with no waiter: {}", line);
            }
        }
    }

    /// Record a status report in the shared session state.
    fn update_status(&self, line: &str) {
        let mut state = self.state.write();
        let previous = state.last_status.as_deref().and_then(status_state);
        let current = status_state(line);
        if let (Some(previous), Some(current)) = (previous, current) {
            if previous != current {
                debug!("Device state changed from {} to {}", previous, current);
            }
        }
        state.last_status = Some(line.to_string());
        state.unhealthy = false;
    }
}

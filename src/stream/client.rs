//! Stream worker and its control handle.
//!
//! One spawned task owns the [`ConnectionManager`], the
//! [`MessageDispatcher`] and the current transport link. Control commands,
//! timer firings and transport events are processed one at a time from a
//! single `select!` loop, so observers see frames in transport order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{Result, TelemetryError};
use crate::observer::Observers;
use crate::stream::dispatch::{Dispatch, MessageDispatcher};
use crate::stream::manager::{Action, AttemptId, ConnectionManager, ConnectionState, TimerKind};
use crate::stream::proto::ClientMessage;
use crate::stream::transport::{Transport, TransportEvent, TransportLink};
use crate::telemetry::{CanonicalTelemetryFrame, Clock};

/// Snapshot published by the worker after every processed event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub message_count: u64,
    pub update_rate: f64,
    pub reconnect_attempts: u32,
}

/// Observer registries shared between the worker and the public client.
#[derive(Clone, Debug, Default)]
pub struct StreamObservers {
    pub updates: Observers<CanonicalTelemetryFrame>,
    pub errors: Observers<TelemetryError>,
    pub states: Observers<ConnectionState>,
}

enum Control {
    Connect {
        url: String,
        token: SecretString,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Token(SecretString),
    ResetCounters,
}

/// Cloneable handle to the stream worker.
///
/// The worker stops once every handle is dropped.
#[derive(Clone)]
pub struct StreamHandle {
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<LinkStatus>,
}

impl StreamHandle {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        observers: StreamObservers,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            manager: ConnectionManager::new(
                config.reconnect.clone(),
                config.subscribe_delay,
                config.ping_interval,
            ),
            dispatcher: MessageDispatcher::new(observers.updates, observers.errors),
            states: observers.states,
            transport,
            clock,
            link: None,
            link_tx,
            timers: HashMap::new(),
            timer_tx,
            status_tx,
        };
        tokio::spawn(worker.run(control_rx, timer_rx, link_rx));

        Self {
            control: control_tx,
            status: status_rx,
        }
    }

    /// Starts connecting to `url`. Resolves once the worker has acted on
    /// the request, not when the connection is established.
    pub async fn connect(&self, url: String, token: SecretString) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        self.control
            .send(Control::Connect { url, token, done })
            .map_err(|_| TelemetryError::WorkerStopped)?;
        done_rx.await.map_err(|_| TelemetryError::WorkerStopped)
    }

    /// Tears down the connection, cancels every timer and resets counters.
    pub async fn disconnect(&self) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        self.control
            .send(Control::Disconnect { done })
            .map_err(|_| TelemetryError::WorkerStopped)?;
        done_rx.await.map_err(|_| TelemetryError::WorkerStopped)
    }

    /// Token for later handshakes of the current connection.
    pub fn update_token(&self, token: SecretString) -> Result<()> {
        self.control
            .send(Control::Token(token))
            .map_err(|_| TelemetryError::WorkerStopped)
    }

    /// Zeroes the message count and update rate. The connection state is
    /// left alone.
    pub fn reset_counters(&self) -> Result<()> {
        self.control
            .send(Control::ResetCounters)
            .map_err(|_| TelemetryError::WorkerStopped)
    }

    /// Latest published status.
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

struct ActiveLink {
    attempt: AttemptId,
    outbound: mpsc::UnboundedSender<String>,
}

struct Worker {
    manager: ConnectionManager,
    dispatcher: MessageDispatcher,
    states: Observers<ConnectionState>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    link: Option<ActiveLink>,
    link_tx: mpsc::UnboundedSender<(AttemptId, TransportEvent)>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    timer_tx: mpsc::UnboundedSender<(TimerKind, AttemptId)>,
    status_tx: watch::Sender<LinkStatus>,
}

impl Worker {
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut timer_rx: mpsc::UnboundedReceiver<(TimerKind, AttemptId)>,
        mut link_rx: mpsc::UnboundedReceiver<(AttemptId, TransportEvent)>,
    ) {
        loop {
            tokio::select! {
                maybe_control = control_rx.recv() => {
                    match maybe_control {
                        Some(control) => self.on_control(control),
                        None => break,
                    }
                }
                Some((timer, attempt)) = timer_rx.recv() => {
                    let actions = self.manager.on_timer(timer, attempt);
                    self.apply(actions);
                }
                Some((attempt, event)) = link_rx.recv() => {
                    self.on_link_event(attempt, event);
                }
            }
            self.publish();
        }

        self.cancel_timers();
        self.link = None;
        tracing::debug!(event = "stream_worker_stopped");
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Connect { url, token, done } => {
                tracing::info!(event = "stream_connect", url = %url);
                let actions = self.manager.connect(url, token);
                self.apply(actions);
                self.publish();
                let _ = done.send(());
            }
            Control::Disconnect { done } => {
                let actions = self.manager.disconnect();
                self.apply(actions);
                self.dispatcher.reset();
                self.publish();
                let _ = done.send(());
            }
            Control::Token(token) => self.manager.replace_token(token),
            Control::ResetCounters => {
                self.dispatcher.reset();
                self.publish();
            }
        }
    }

    fn on_link_event(&mut self, attempt: AttemptId, event: TransportEvent) {
        let current = self
            .link
            .as_ref()
            .is_some_and(|link| link.attempt == attempt);
        if !current {
            return;
        }

        let actions = match event {
            TransportEvent::Opened => {
                tracing::info!(event = "stream_transport_open", attempt);
                self.manager.on_transport_open(attempt)
            }
            TransportEvent::Frame(text) => {
                match self.dispatcher.dispatch(&text, self.clock.now()) {
                    Dispatch::AuthResponse { success, error } => {
                        self.manager.on_auth_response(success, error)
                    }
                    _ => Vec::new(),
                }
            }
            TransportEvent::Closed { reason } => {
                tracing::warn!(event = "stream_transport_closed", attempt, reason = %reason);
                self.link = None;
                self.manager.on_transport_closed(attempt, reason)
            }
        };
        self.apply(actions);
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Open { url, attempt } => self.open(&url, attempt),
                Action::Send(message) => self.send(&message),
                Action::Close => self.link = None,
                Action::Schedule {
                    timer,
                    delay,
                    attempt,
                } => {
                    let timer_tx = self.timer_tx.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = timer_tx.send((timer, attempt));
                    });
                    if let Some(previous) = self.timers.insert(timer, task) {
                        previous.abort();
                    }
                }
                Action::CancelTimers => self.cancel_timers(),
                Action::StateChanged(state) => {
                    tracing::info!(event = "stream_state", state = %state);
                    self.publish();
                    self.states.notify(&state);
                }
                Action::Report(fault) => self.dispatcher.report(fault.into()),
            }
        }
    }

    fn open(&mut self, url: &str, attempt: AttemptId) {
        let TransportLink {
            outbound,
            mut inbound,
        } = self.transport.open(url);
        let link_tx = self.link_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let last = matches!(event, TransportEvent::Closed { .. });
                if link_tx.send((attempt, event)).is_err() || last {
                    return;
                }
            }
            let _ = link_tx.send((
                attempt,
                TransportEvent::Closed {
                    reason: "transport dropped".to_string(),
                },
            ));
        });
        self.link = Some(ActiveLink { attempt, outbound });
    }

    fn send(&self, message: &ClientMessage) {
        let Some(link) = self.link.as_ref() else {
            tracing::debug!(event = "stream_send_without_link", kind = message.kind());
            return;
        };
        match message.to_text() {
            Ok(text) => {
                tracing::debug!(event = "stream_frame_sent", kind = message.kind());
                if link.outbound.send(text).is_err() {
                    tracing::debug!(event = "stream_send_failed", kind = message.kind());
                }
            }
            Err(err) => self.dispatcher.report(err.into()),
        }
    }

    fn cancel_timers(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(LinkStatus {
            state: self.manager.state(),
            message_count: self.dispatcher.message_count(),
            update_rate: self.dispatcher.update_rate(),
            reconnect_attempts: self.manager.attempts(),
        });
    }
}

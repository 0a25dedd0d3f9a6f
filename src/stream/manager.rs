//! Connection lifecycle state machine.
//!
//! [`ConnectionManager`] performs no IO. Every input (control call,
//! transport event, timer firing) returns the [`Action`]s the stream worker
//! must execute, in order. Timers and transport events carry the
//! [`AttemptId`] they were created under; anything from an older attempt is
//! ignored.

use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::TelemetryError;
use crate::retry::ReconnectPolicy;
use crate::stream::proto::ClientMessage;

/// Identifier of one transport attempt. Bumped on every open and on every
/// teardown.
pub type AttemptId = u64;

/// Stream connection lifecycle.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Reconnecting,
    /// Reconnect attempts exhausted. Left only through an explicit connect.
    Failed,
}

impl ConnectionState {
    /// True while a websocket is open.
    pub fn is_transport_open(self) -> bool {
        matches!(self, Self::Authenticating | Self::Subscribed)
    }

    /// True while the client is connected or trying to be.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Subscribed | Self::Reconnecting
        )
    }

    /// Snake-case state name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TimerKind {
    /// One-shot subscribe after a successful handshake.
    Subscribe,
    /// Periodic liveness ping.
    Ping,
    /// Backoff before the next reconnect attempt.
    Reconnect,
}

/// Faults surfaced to error observers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    AuthRejected(String),
    TransportLost(String),
    ReconnectExhausted { attempts: u32 },
}

impl From<Fault> for TelemetryError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::AuthRejected(reason) => TelemetryError::Authentication(reason),
            Fault::TransportLost(reason) => TelemetryError::Transport(reason),
            Fault::ReconnectExhausted { attempts } => TelemetryError::Transport(format!(
                "giving up after {attempts} reconnect attempts"
            )),
        }
    }
}

/// Side effect requested by the state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Open a new link, replacing any current one.
    Open { url: String, attempt: AttemptId },
    /// Send a frame on the current link.
    Send(ClientMessage),
    /// Drop the current link.
    Close,
    Schedule {
        timer: TimerKind,
        delay: Duration,
        attempt: AttemptId,
    },
    CancelTimers,
    StateChanged(ConnectionState),
    Report(Fault),
}

/// Owns the connection state, attempt counter and attempt id.
pub struct ConnectionManager {
    state: ConnectionState,
    attempts: u32,
    attempt_id: AttemptId,
    url: Option<String>,
    token: Option<SecretString>,
    reconnect: ReconnectPolicy,
    subscribe_delay: Duration,
    ping_interval: Duration,
}

impl ConnectionManager {
    /// Idle manager with the given schedule.
    pub fn new(
        reconnect: ReconnectPolicy,
        subscribe_delay: Duration,
        ping_interval: Duration,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            attempt_id: 0,
            url: None,
            token: None,
            reconnect,
            subscribe_delay,
            ping_interval,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Id of the newest connection attempt. Older ids are stale.
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Stream URL of the last `connect`.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Starts connecting from `Disconnected` or `Failed`. A no-op while a
    /// connection is active or being re-established.
    pub fn connect(&mut self, url: String, token: SecretString) -> Vec<Action> {
        if self.state.is_active() {
            tracing::debug!(event = "connect_ignored", state = %self.state);
            return Vec::new();
        }

        self.url = Some(url.clone());
        self.token = Some(token);
        self.attempts = 0;
        let attempt = self.next_attempt();

        let mut actions = vec![Action::CancelTimers];
        self.transition(ConnectionState::Connecting, &mut actions);
        actions.push(Action::Open { url, attempt });
        actions
    }

    /// Starts the handshake once link `attempt` has opened.
    pub fn on_transport_open(&mut self, attempt: AttemptId) -> Vec<Action> {
        if attempt != self.attempt_id || self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        let Some(token) = self.token.as_ref() else {
            return Vec::new();
        };
        let auth = ClientMessage::Auth {
            token: token.expose_secret().to_string(),
        };

        self.attempts = 0;
        let mut actions = Vec::new();
        self.transition(ConnectionState::Authenticating, &mut actions);
        actions.push(Action::Send(auth));
        actions
    }

    /// Handles the server's handshake verdict for the current link.
    pub fn on_auth_response(&mut self, success: bool, error: Option<String>) -> Vec<Action> {
        if self.state != ConnectionState::Authenticating {
            tracing::debug!(event = "auth_response_ignored", state = %self.state, success);
            return Vec::new();
        }

        let mut actions = Vec::new();
        if success {
            self.transition(ConnectionState::Subscribed, &mut actions);
            actions.push(Action::Schedule {
                timer: TimerKind::Subscribe,
                delay: self.subscribe_delay,
                attempt: self.attempt_id,
            });
            actions.push(Action::Schedule {
                timer: TimerKind::Ping,
                delay: self.ping_interval,
                attempt: self.attempt_id,
            });
        } else {
            self.next_attempt();
            self.attempts = 0;
            actions.push(Action::CancelTimers);
            actions.push(Action::Close);
            self.transition(ConnectionState::Disconnected, &mut actions);
            actions.push(Action::Report(Fault::AuthRejected(
                error.unwrap_or_else(|| "authentication rejected".to_string()),
            )));
        }
        actions
    }

    /// Handles a failed open or an unexpected close of link `attempt`.
    pub fn on_transport_closed(&mut self, attempt: AttemptId, reason: String) -> Vec<Action> {
        let link_state = matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Subscribed
        );
        if attempt != self.attempt_id || !link_state {
            return Vec::new();
        }

        let mut actions = vec![Action::CancelTimers];
        if self.reconnect.allows(self.attempts) {
            self.transition(ConnectionState::Reconnecting, &mut actions);
            actions.push(Action::Report(Fault::TransportLost(reason)));
            actions.push(Action::Schedule {
                timer: TimerKind::Reconnect,
                delay: self.reconnect.delay_for_attempt(self.attempts + 1),
                attempt: self.attempt_id,
            });
        } else {
            self.transition(ConnectionState::Failed, &mut actions);
            actions.push(Action::Report(Fault::TransportLost(reason)));
            actions.push(Action::Report(Fault::ReconnectExhausted {
                attempts: self.attempts,
            }));
        }
        actions
    }

    /// Handles a fired timer scheduled for link `attempt`.
    pub fn on_timer(&mut self, timer: TimerKind, attempt: AttemptId) -> Vec<Action> {
        if attempt != self.attempt_id {
            return Vec::new();
        }

        match (timer, self.state) {
            (TimerKind::Subscribe, ConnectionState::Subscribed) => {
                vec![Action::Send(ClientMessage::subscribe_all())]
            }
            (TimerKind::Ping, ConnectionState::Subscribed) => vec![
                Action::Send(ClientMessage::Ping),
                Action::Schedule {
                    timer: TimerKind::Ping,
                    delay: self.ping_interval,
                    attempt,
                },
            ],
            (TimerKind::Reconnect, ConnectionState::Reconnecting) => {
                let Some(url) = self.url.clone() else {
                    return Vec::new();
                };
                self.attempts += 1;
                let attempt = self.next_attempt();
                tracing::info!(
                    event = "stream_reconnect_attempt",
                    attempt = self.attempts,
                    max_attempts = self.reconnect.max_attempts
                );
                let mut actions = Vec::new();
                self.transition(ConnectionState::Connecting, &mut actions);
                actions.push(Action::Open { url, attempt });
                actions
            }
            _ => Vec::new(),
        }
    }

    /// Swaps the token used by later handshakes. Ignored when no connection
    /// is wanted.
    pub fn replace_token(&mut self, token: SecretString) {
        if self.token.is_some() {
            self.token = Some(token);
        }
    }

    /// Tears the connection down from any state.
    pub fn disconnect(&mut self) -> Vec<Action> {
        self.next_attempt();
        self.attempts = 0;
        self.token = None;

        let mut actions = vec![Action::CancelTimers, Action::Close];
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions
    }

    fn next_attempt(&mut self) -> AttemptId {
        self.attempt_id += 1;
        self.attempt_id
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<Action>) {
        if self.state == next {
            return;
        }
        tracing::debug!(event = "stream_state_changed", from = %self.state, to = %next);
        self.state = next;
        actions.push(Action::StateChanged(next));
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("attempt_id", &self.attempt_id)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

//! Public client facade.

use std::sync::Arc;

use reqwest::Client;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::api::{HistoryCategory, HistoryQueryClient, HistoryRecord, StatsKind, TimeRange};
use crate::auth::{AuthSession, LoginOutcome, Role, SessionSnapshot};
use crate::config::ClientConfig;
use crate::error::{Result, TelemetryError};
use crate::observer::Subscription;
use crate::stream::{
    ConnectionState, LinkStatus, StreamHandle, StreamObservers, Transport, WsTransport,
};
use crate::telemetry::{CanonicalTelemetryFrame, Clock, SystemClock};

/// Point-in-time view of the session and live feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub message_count: u64,
    pub update_rate: f64,
    /// True while the websocket is open (authenticating or subscribed).
    pub connected: bool,
    pub server_url: Option<String>,
    pub ws_url: Option<String>,
    pub username: Option<String>,
    pub role: Option<Role>,
}

/// Telemetry session client.
///
/// Owns one authenticated session, one live stream and the REST query
/// surface. Must be created inside a tokio runtime; the stream worker is
/// spawned on construction and stops when the client is dropped.
#[derive(Debug)]
pub struct TelemetryClient {
    config: ClientConfig,
    session: AuthSession,
    queries: HistoryQueryClient,
    stream: StreamHandle,
    observers: StreamObservers,
    _expiry: Subscription,
}

impl TelemetryClient {
    /// Client with the websocket transport and the system clock.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(WsTransport::new(config.ws_connect_timeout));
        Self::with_parts(config, transport, Arc::new(SystemClock))
    }

    /// Client with an injected transport and clock.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(config.http_connect_timeout)
            .build()?;
        let session = AuthSession::new(http, config.http_attempt_timeout);
        let queries = HistoryQueryClient::new(
            session.clone(),
            config.http_attempt_timeout,
            config.query_retry.clone(),
        )
        .with_fallback_server_url(config.server_url.clone());
        let observers = StreamObservers::default();
        let stream = StreamHandle::spawn(&config, transport, clock, observers.clone());
        let expiry = {
            let stream = stream.clone();
            session.on_expired(move || {
                if let Err(err) = stream.reset_counters() {
                    tracing::debug!(event = "expiry_reset_failed", error = %err);
                }
            })
        };

        Ok(Self {
            config,
            session,
            queries,
            stream,
            observers,
            _expiry: expiry,
        })
    }

    /// Logs in and stores the session token.
    pub async fn login(
        &self,
        server_url: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginOutcome> {
        self.session.login(server_url, username, password).await
    }

    /// Disconnects the stream, then ends the session. Never fails.
    pub async fn logout(&self) {
        if let Err(err) = self.stream.disconnect().await {
            tracing::debug!(event = "logout_disconnect_failed", error = %err);
        }
        self.session.logout().await;
    }

    /// Renews the session token. The live stream keeps its handshake and
    /// presents the new token when it next reconnects.
    pub async fn refresh_token(&self) -> Result<()> {
        self.session.refresh().await?;
        let credentials = self.session.credentials()?;
        self.stream.update_token(credentials.token)
    }

    /// Opens the live stream. Requires a logged-in session.
    pub async fn connect(&self) -> Result<()> {
        let credentials = self.session.credentials()?;
        let ws_url = self.config.stream_url(&credentials.server_url)?;
        self.stream.connect(ws_url, credentials.token).await
    }

    /// Closes the live stream and cancels pending reconnects.
    pub async fn disconnect(&self) -> Result<()> {
        self.stream.disconnect().await
    }

    /// Registers a callback for every normalized telemetry frame.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CanonicalTelemetryFrame) + Send + Sync + 'static,
    {
        self.observers.updates.register(callback)
    }

    /// Registers a callback for stream transport and protocol errors.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TelemetryError) + Send + Sync + 'static,
    {
        self.observers.errors.register(callback)
    }

    /// Registers a callback for connection state transitions.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.observers.states.register(callback)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.stream.status().state
    }

    /// Receiver of every published stream status.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.stream.watch()
    }

    /// Counters, link state and session identity.
    pub fn stats(&self) -> ConnectionStats {
        let status = self.stream.status();
        let session = self.session.snapshot();
        let ws_url = session
            .server_url
            .as_deref()
            .and_then(|server_url| self.config.stream_url(server_url).ok());

        ConnectionStats {
            message_count: status.message_count,
            update_rate: status.update_rate,
            connected: status.state.is_transport_open(),
            server_url: session.server_url,
            ws_url,
            username: session.username,
            role: session.role,
        }
    }

    /// Session identity without the token.
    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// History rows of `category` within `range`, normalized.
    pub async fn history(
        &self,
        category: HistoryCategory,
        range: TimeRange,
    ) -> Result<Vec<HistoryRecord>> {
        self.queries.history(category, range).await
    }

    /// History rows exactly as the server sent them.
    pub async fn history_raw(
        &self,
        category: HistoryCategory,
        range: TimeRange,
    ) -> Result<Vec<Value>> {
        self.queries.history_raw(category, range).await
    }

    /// CSV export of `category` within `range`.
    pub async fn export_csv(&self, category: HistoryCategory, range: TimeRange) -> Result<Vec<u8>> {
        self.queries.export_csv(category, range).await
    }

    /// Latest server-side snapshot, normalized.
    pub async fn current(&self) -> Result<CanonicalTelemetryFrame> {
        self.queries.current().await
    }

    /// Server storage statistics of the given kind.
    pub async fn storage_stats(&self, kind: StatsKind) -> Result<Value> {
        self.queries.storage_stats(kind).await
    }

    /// Server health report. Usable before login.
    pub async fn health(&self) -> Result<Value> {
        self.queries.health().await
    }

    /// Server version report. Usable before login.
    pub async fn version(&self) -> Result<Value> {
        self.queries.version().await
    }

    /// Direct access to the REST query client.
    pub fn queries(&self) -> &HistoryQueryClient {
        &self.queries
    }
}

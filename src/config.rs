//! Client configuration.
//!
//! All knobs are injected through [`ClientConfig`]; nothing is read from
//! global state unless [`ClientConfig::from_env`] is called explicitly.

use std::time::Duration;

use url::Url;

use crate::error::{Result, TelemetryError};
use crate::retry::{ReconnectPolicy, RetryPolicy};

/// Path of the telemetry websocket on the stream server.
pub const TELEMETRY_WS_PATH: &str = "/telemetry";

/// Environment variable naming the server for public endpoints.
pub const ENV_SERVER_URL: &str = "RCWS_SERVER_URL";
/// Environment variable overriding the reconnect attempt limit.
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "RCWS_MAX_RECONNECT_ATTEMPTS";
/// Environment variable overriding the reconnect delay, in milliseconds.
pub const ENV_RECONNECT_DELAY_MS: &str = "RCWS_RECONNECT_DELAY_MS";

/// Default values used by [`ClientConfig::default`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    /// Reconnect attempts before the stream is marked failed.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    /// Fixed delay between reconnect attempts.
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);
    /// Delay between a successful handshake and the subscribe frame.
    pub const SUBSCRIBE_DELAY: Duration = Duration::from_millis(500);
    /// Keepalive ping period while subscribed.
    pub const PING_INTERVAL: Duration = Duration::from_secs(20);
    /// TCP connect timeout for REST calls.
    pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Timeout of one REST request attempt.
    pub const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
    /// Websocket open timeout.
    pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// REST port and the websocket port that replaces it.
    pub const STREAM_PORT_MAP: (u16, u16) = (8443, 8444);
}

/// Stream and REST settings for one [`TelemetryClient`](crate::TelemetryClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server used by public endpoints (health, version) before login.
    pub server_url: Option<String>,
    pub reconnect: ReconnectPolicy,
    /// Delay between a successful `auth_response` and the subscribe frame.
    pub subscribe_delay: Duration,
    pub ping_interval: Duration,
    /// `(rest_port, stream_port)`: a server URL on `rest_port` streams on
    /// `stream_port`.
    pub stream_port_map: (u16, u16),
    pub http_connect_timeout: Duration,
    pub http_attempt_timeout: Duration,
    pub ws_connect_timeout: Duration,
    /// Retry policy for idempotent GET requests.
    pub query_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            reconnect: ReconnectPolicy::fixed(
                ClientDefaults::RECONNECT_DELAY,
                ClientDefaults::MAX_RECONNECT_ATTEMPTS,
            ),
            subscribe_delay: ClientDefaults::SUBSCRIBE_DELAY,
            ping_interval: ClientDefaults::PING_INTERVAL,
            stream_port_map: ClientDefaults::STREAM_PORT_MAP,
            http_connect_timeout: ClientDefaults::HTTP_CONNECT_TIMEOUT,
            http_attempt_timeout: ClientDefaults::HTTP_ATTEMPT_TIMEOUT,
            ws_connect_timeout: ClientDefaults::WS_CONNECT_TIMEOUT,
            query_retry: RetryPolicy::for_queries(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `RCWS_*` environment variables.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|url| !url.trim().is_empty()) {
            config.server_url = Some(url.trim().to_string());
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_MAX_RECONNECT_ATTEMPTS) {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(delay_ms) = parse_var::<u64>(&lookup, ENV_RECONNECT_DELAY_MS) {
            let delay = Duration::from_millis(delay_ms);
            config.reconnect.delay = delay;
            config.reconnect.max_delay = config.reconnect.max_delay.max(delay);
        }
        config
    }

    /// Sets the server used by public endpoints before login.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets the reconnect schedule.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the delay before subscribing after a handshake.
    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    /// Sets the keepalive ping period.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Maps `rest_port` to `stream_port` when deriving the stream URL.
    pub fn with_stream_port_map(mut self, rest_port: u16, stream_port: u16) -> Self {
        self.stream_port_map = (rest_port, stream_port);
        self
    }

    /// Sets the retry policy for REST GET requests.
    pub fn with_query_retry(mut self, policy: RetryPolicy) -> Self {
        self.query_retry = policy;
        self
    }

    /// Websocket URL for a REST server URL: scheme upgraded, REST port
    /// replaced by the stream port, path set to `/telemetry`.
    pub fn stream_url(&self, server_url: &str) -> Result<String> {
        let mut url = Url::parse(server_url)
            .map_err(|err| TelemetryError::InvalidUrl(format!("{server_url}: {err}")))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TelemetryError::InvalidUrl(format!(
                    "unsupported scheme {other}"
                )))
            }
        };
        let port = url.port();
        url.set_scheme(scheme)
            .map_err(|()| TelemetryError::InvalidUrl(format!("cannot use scheme {scheme}")))?;

        let (rest_port, stream_port) = self.stream_port_map;
        if let Some(port) = port {
            let next = if port == rest_port { stream_port } else { port };
            url.set_port(Some(next))
                .map_err(|()| TelemetryError::InvalidUrl("url cannot carry a port".to_string()))?;
        }

        url.set_path(TELEMETRY_WS_PATH);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.to_string())
    }
}

/// Trims whitespace and trailing slashes from a server URL.
pub(crate) fn normalize_server_url(server_url: &str) -> Result<String> {
    let trimmed = server_url.trim().trim_end_matches('/');
    Url::parse(trimmed).map_err(|err| TelemetryError::InvalidUrl(format!("{trimmed}: {err}")))?;
    Ok(trimmed.to_string())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(event = "config_env_ignored", key, value = %raw);
            None
        }
    }
}

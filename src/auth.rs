//! Login, logout and token lifecycle.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::json;

use crate::api::{parse_timestamp, server_message, summarize_error_body};
use crate::config::normalize_server_url;
use crate::error::{Result, TelemetryError};
use crate::observer::{Observers, Subscription};

const LOGIN_PATH: &str = "/api/auth/login";
const LOGOUT_PATH: &str = "/api/auth/logout";
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Operator role granted by the server.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Viewer,
    Operator,
    Admin,
}

impl Role {
    /// Maps the server's numeric role code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Viewer),
            1 => Some(Self::Operator),
            2 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Lowercase role name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "operator" => Ok(Self::Operator),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RoleRepr {
            Code(i64),
            Name(String),
        }

        match RoleRepr::deserialize(deserializer)? {
            RoleRepr::Code(code) => Role::from_code(code)
                .ok_or_else(|| de::Error::custom(format!("unknown role code {code}"))),
            RoleRepr::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}

/// Result of a successful login.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub role: Role,
}

/// Everything an authenticated call needs.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub server_url: String,
    pub token: SecretString,
    pub username: String,
    pub role: Role,
}

/// Token-free view of the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub expires_at: Option<DateTime<Utc>>,
    pub authenticated: bool,
}

#[derive(Default)]
struct SessionState {
    server_url: Option<String>,
    username: Option<String>,
    role: Option<Role>,
    token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn clear(&mut self) {
        self.token = None;
        self.username = None;
        self.role = None;
        self.expires_at = None;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    expires_at: Option<String>,
}

/// Shared authentication state. Clones refer to the same session.
#[derive(Clone)]
pub struct AuthSession {
    http: Client,
    attempt_timeout: Duration,
    state: Arc<RwLock<SessionState>>,
    expired: Observers<()>,
}

impl AuthSession {
    /// Empty session using `http` for every request.
    pub fn new(http: Client, attempt_timeout: Duration) -> Self {
        Self {
            http,
            attempt_timeout,
            state: Arc::new(RwLock::new(SessionState::default())),
            expired: Observers::new(),
        }
    }

    /// Exchanges username and password for a session token.
    ///
    /// A rejected login leaves any previous session untouched.
    pub async fn login(
        &self,
        server_url: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginOutcome> {
        let server_url = normalize_server_url(server_url)?;
        let body = json!({
            "username": username,
            "password": password.expose_secret(),
        });

        let response = self
            .http
            .post(format!("{server_url}{LOGIN_PATH}"))
            .timeout(self.attempt_timeout)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(
                event = "login_rejected",
                status = status.as_u16(),
                username
            );
            return Err(TelemetryError::Authentication(
                server_message(&text).unwrap_or_else(|| "login failed".to_string()),
            ));
        }

        let parsed: TokenResponse = serde_json::from_str(&text)?;
        let role = parsed.role.unwrap_or_default();
        {
            let mut state = self.write();
            state.server_url = Some(server_url);
            state.username = Some(username.to_string());
            state.role = Some(role);
            state.token = Some(SecretString::new(parsed.token));
            state.expires_at = parsed.expires_at.as_deref().and_then(parse_timestamp);
        }

        tracing::info!(event = "login_succeeded", username, role = %role);
        Ok(LoginOutcome {
            success: true,
            role,
        })
    }

    /// Best-effort server logout, then clears the local session. Never
    /// fails.
    pub async fn logout(&self) {
        let target = self.credentials().ok();
        if let Some(credentials) = target {
            let result = self
                .http
                .post(format!("{}{LOGOUT_PATH}", credentials.server_url))
                .timeout(self.attempt_timeout)
                .bearer_auth(credentials.token.expose_secret())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(event = "logout_failed", status = response.status().as_u16());
                }
                Err(err) => tracing::warn!(event = "logout_failed", error = %err),
            }
        }

        self.write().clear();
        tracing::info!(event = "logged_out");
    }

    /// Trades the current token for a fresh one.
    pub async fn refresh(&self) -> Result<()> {
        let credentials = self.credentials()?;
        let response = self
            .http
            .post(format!("{}{REFRESH_PATH}", credentials.server_url))
            .timeout(self.attempt_timeout)
            .bearer_auth(credentials.token.expose_secret())
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            self.invalidate();
            return Err(TelemetryError::expired());
        }
        if !status.is_success() {
            return Err(TelemetryError::Api {
                status,
                message: summarize_error_body(&text),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&text)?;
        let mut state = self.write();
        state.token = Some(SecretString::new(parsed.token));
        state.expires_at = parsed.expires_at.as_deref().and_then(parse_timestamp);
        if let Some(role) = parsed.role {
            state.role = Some(role);
        }
        tracing::debug!(event = "token_refreshed");
        Ok(())
    }

    /// Current credentials, or `AuthenticationError("not authenticated")`.
    pub fn credentials(&self) -> Result<Credentials> {
        let state = self.read();
        match (&state.server_url, &state.token) {
            (Some(server_url), Some(token)) => Ok(Credentials {
                server_url: server_url.clone(),
                token: token.clone(),
                username: state.username.clone().unwrap_or_default(),
                role: state.role.unwrap_or_default(),
            }),
            _ => Err(TelemetryError::not_authenticated()),
        }
    }

    /// Whether a token is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.read().token.is_some()
    }

    /// Drops the token after the server reported it expired and notifies
    /// expiry observers.
    pub fn invalidate(&self) {
        let dropped = self.write().token.take().is_some();
        if dropped {
            tracing::warn!(event = "session_invalidated");
            self.expired.notify(&());
        }
    }

    /// Registers a callback run each time a held token is invalidated.
    pub fn on_expired<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.expired.register(move |_: &()| callback())
    }

    /// Session identity without the token.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        SessionSnapshot {
            server_url: state.server_url.clone(),
            username: state.username.clone(),
            role: state.role,
            expires_at: state.expires_at,
            authenticated: state.token.is_some(),
        }
    }

    pub(crate) fn server_url(&self) -> Option<String> {
        self.read().server_url.clone()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("session", &self.snapshot())
            .finish()
    }
}

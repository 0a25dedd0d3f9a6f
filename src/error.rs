//! Error taxonomy shared by the session, stream and REST surfaces.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Errors produced by the telemetry client.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Login rejected, token missing, or token expired.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Websocket open failure or unexpected close.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unparseable or server-reported stream frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Non-success REST response; message taken from the server payload
    /// when present.
    #[error("api error (http {status}): {message}")]
    Api { status: StatusCode, message: String },

    /// HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server URL could not be parsed or rewritten.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// Caller-supplied arguments were rejected before any request was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Background stream worker is gone.
    #[error("stream worker stopped")]
    WorkerStopped,
}

impl TelemetryError {
    pub(crate) fn not_authenticated() -> Self {
        Self::Authentication("not authenticated".to_string())
    }

    pub(crate) fn expired() -> Self {
        Self::Authentication("authentication expired".to_string())
    }

    /// True for errors that invalidate the current session.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Whether a REST call failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Frame-level protocol failures. Reported to error observers, never fatal
/// to the connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame was not valid JSON or a known tag carried wrong field types.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Frame had no string `type` tag.
    #[error("frame is missing a type tag")]
    MissingType,

    /// Server sent an `error` frame.
    #[error("server error: {0}")]
    Server(String),
}

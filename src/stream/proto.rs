use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Subscription category covering every telemetry group.
pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Subscribe { categories: Vec<String> },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Telemetry {
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Known(ServerMessage),
    /// Well-formed frame with a tag this client does not handle.
    Unknown { tag: String },
}

const KNOWN_TAGS: &[&str] = &["auth_response", "telemetry", "pong", "error"];

impl ClientMessage {
    /// Subscription to every telemetry category.
    pub fn subscribe_all() -> Self {
        Self::Subscribe {
            categories: vec![ALL_CATEGORIES.to_string()],
        }
    }

    /// Tag name, safe to log (never includes the token).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Subscribe { .. } => "subscribe",
            Self::Ping => "ping",
        }
    }

    /// Decodes one text frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encodes the message as one text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Encodes the message as one text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Human-readable message of an `error` frame.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Self::Error { error, message } => Some(
                error
                    .clone()
                    .or_else(|| message.clone())
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            ),
            _ => None,
        }
    }
}

impl InboundFrame {
    /// Decodes a text frame, separating unknown tags from malformed input.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if !KNOWN_TAGS.contains(&tag) {
            return Ok(Self::Unknown {
                tag: tag.to_string(),
            });
        }

        serde_json::from_value(value)
            .map(Self::Known)
            .map_err(|err| ProtocolError::Malformed(err.to_string()))
    }
}

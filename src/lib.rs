//! Telemetry session client for RCWS stations.
//!
//! The crate is organized by concern:
//! - `auth`: login, logout and token lifecycle.
//! - `stream`: live websocket feed with reconnection.
//! - `telemetry`: canonical frame, payload normalization and rate tracking.
//! - `api`: history, export and auxiliary REST queries.
//! - `client`: the [`TelemetryClient`] facade tying these together.
//! - `config`, `error`, `observer`, `retry`: shared plumbing.

/// History, export and auxiliary REST queries.
pub mod api;
/// Authentication session.
pub mod auth;
/// Public client facade.
pub mod client;
/// Client configuration and defaults.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Observer registries and subscription handles.
pub mod observer;
/// Retry and timeout helpers.
pub mod retry;
/// Live telemetry stream.
pub mod stream;
/// Canonical telemetry model.
pub mod telemetry;

pub use api::{HistoryCategory, HistoryQueryClient, HistoryRecord, StatsKind, TimeRange};
pub use auth::{AuthSession, LoginOutcome, Role, SessionSnapshot};
pub use client::{ConnectionStats, TelemetryClient};
pub use config::{ClientConfig, ClientDefaults};
pub use error::{ProtocolError, Result, TelemetryError};
pub use observer::Subscription;
pub use retry::{ReconnectPolicy, RetryPolicy};
pub use stream::{
    ConnectionState, LinkStatus, Transport, TransportEvent, TransportLink, WsTransport,
};
pub use telemetry::{CanonicalTelemetryFrame, Clock, SystemClock, WireFormat};

//! Realtime telemetry stream.
//!
//! - `proto`: frames exchanged with the stream server.
//! - `transport`: the websocket seam and its `tokio-tungstenite` backend.
//! - `manager`: the sans-IO connection state machine.
//! - `dispatch`: inbound frame routing to observers.
//! - `client`: the worker task that drives all of the above.

/// Stream worker and control handle.
pub mod client;
/// Inbound frame dispatcher.
pub mod dispatch;
/// Connection lifecycle state machine.
pub mod manager;
/// Stream protocol messages.
pub mod proto;
/// Transport trait and websocket implementation.
pub mod transport;

pub use client::{LinkStatus, StreamHandle, StreamObservers};
pub use manager::{ConnectionState, ConnectionManager};
pub use transport::{Transport, TransportEvent, TransportLink, WsTransport};

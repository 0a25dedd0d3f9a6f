//! Inbound frame routing.

use tokio::time::Instant;

use crate::error::{ProtocolError, TelemetryError};
use crate::observer::Observers;
use crate::stream::proto::{InboundFrame, ServerMessage};
use crate::telemetry::{normalize, CanonicalTelemetryFrame, RateTracker};

/// What a frame turned out to be, for the caller to act on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Handshake verdict; the connection manager decides what follows.
    AuthResponse {
        success: bool,
        error: Option<String>,
    },
    /// Telemetry delivered to update observers.
    Telemetry,
    Pong,
    /// Server `error` frame reported to error observers.
    ServerError,
    /// Unknown tag, dropped.
    Ignored { tag: String },
    /// Malformed frame reported to error observers.
    Rejected,
}

/// Decodes stream frames and fans telemetry and errors out to observers.
///
/// Dispatch never fails: every frame either produces a [`Dispatch`] the
/// caller acts on or is reported through the error observers.
#[derive(Debug)]
pub struct MessageDispatcher {
    updates: Observers<CanonicalTelemetryFrame>,
    errors: Observers<TelemetryError>,
    rate: RateTracker,
    message_count: u64,
}

impl MessageDispatcher {
    /// Dispatcher fanning frames out to the given observers.
    pub fn new(
        updates: Observers<CanonicalTelemetryFrame>,
        errors: Observers<TelemetryError>,
    ) -> Self {
        Self {
            updates,
            errors,
            rate: RateTracker::new(),
            message_count: 0,
        }
    }

    /// Routes one text frame received at `now`.
    pub fn dispatch(&mut self, text: &str, now: Instant) -> Dispatch {
        let message = match InboundFrame::from_text(text) {
            Ok(InboundFrame::Known(message)) => message,
            Ok(InboundFrame::Unknown { tag }) => {
                tracing::debug!(event = "stream_frame_ignored", tag = %tag);
                return Dispatch::Ignored { tag };
            }
            Err(err) => {
                self.report(TelemetryError::Protocol(err));
                return Dispatch::Rejected;
            }
        };

        match message {
            ServerMessage::AuthResponse { success, error } => {
                Dispatch::AuthResponse { success, error }
            }
            ServerMessage::Telemetry { data, .. } => {
                self.message_count += 1;
                self.rate.record(now);
                let frame = normalize(&data);
                self.updates.notify(&frame);
                Dispatch::Telemetry
            }
            ServerMessage::Pong { .. } => Dispatch::Pong,
            message @ ServerMessage::Error { .. } => {
                let text = message.error_text().unwrap_or_default();
                self.report(TelemetryError::Protocol(ProtocolError::Server(text)));
                Dispatch::ServerError
            }
        }
    }

    /// Surfaces an error to error observers.
    pub fn report(&self, error: TelemetryError) {
        tracing::warn!(event = "stream_error_reported", error = %error);
        self.errors.notify(&error);
    }

    /// Telemetry frames dispatched since the last reset.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Current update rate in Hz.
    pub fn update_rate(&self) -> f64 {
        self.rate.update_rate()
    }

    /// Clears the message counter and rate tracking.
    pub fn reset(&mut self) {
        self.message_count = 0;
        self.rate.reset();
    }
}

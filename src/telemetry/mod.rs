//! Canonical telemetry model.
//!
//! - `schema`: the canonical frame and the field mapping table.
//! - `normalize`: wire-format detection and mapping onto the canonical frame.
//! - `rate`: update-rate tracking and the injectable clock.

pub mod normalize;
pub mod rate;
pub mod schema;

pub use normalize::{normalize, WireFormat};
pub use rate::{Clock, RateTracker, SystemClock};
pub use schema::CanonicalTelemetryFrame;

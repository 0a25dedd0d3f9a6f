//! Update-rate tracking for the live feed.

use std::fmt;

use tokio::time::Instant;

/// Source of frame arrival timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by `tokio::time::Instant`, so paused test time applies.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Derives an instantaneous update rate (Hz) from consecutive frame
/// arrivals.
#[derive(Clone, Copy, Default)]
pub struct RateTracker {
    last_message_time: Option<Instant>,
    update_rate: f64,
}

impl RateTracker {
    /// Tracker with no frames seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame arrival and returns the freshly computed rate.
    ///
    /// Returns `None` for the first frame after a reset, and for a frame
    /// arriving at the same instant as the previous one; the stored rate is
    /// left untouched in both cases.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        let previous = self.last_message_time.replace(now)?;
        let elapsed = now.checked_duration_since(previous)?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        self.update_rate = round_tenths(1.0 / elapsed);
        Some(self.update_rate)
    }

    /// Last computed rate in Hz, `0` until two frames have arrived.
    pub fn update_rate(&self) -> f64 {
        self.update_rate
    }

    /// Arrival time of the last recorded frame.
    pub fn last_message_time(&self) -> Option<Instant> {
        self.last_message_time
    }

    /// Forgets the last arrival and zeroes the rate.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Debug for RateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateTracker")
            .field("update_rate", &self.update_rate)
            .field("has_previous", &self.last_message_time.is_some())
            .finish()
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

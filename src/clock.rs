//! Wall-clock abstraction.
//!
//! Bucket state is a single wall-clock timestamp, so every consume needs the
//! current time with sub-millisecond precision. The trait exists so tests can
//! substitute a manual clock and exercise refill arithmetic deterministically.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch as a float with microsecond precision.
    fn now(&self) -> f64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Returns a shared handle to the system clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// A manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<f64>,
}

impl ManualClock {
    /// Create a manual clock starting at `now` epoch seconds.
    pub fn starting_at(now: f64) -> Self {
        Self {
            now: parking_lot::Mutex::new(now),
        }
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

//! # Clock
//!
//! Wall-clock source for every time-based decision in the sync core
//! (retry eligibility, cache TTL).
//!
//! Engines hold an `Arc<dyn Clock>`. Production wiring uses [`SystemClock`];
//! tests drive [`ManualClock`] forward to simulate minutes of backoff or an
//! expired TTL without sleeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            current: Mutex::new(start),
        }
    }

    /// Creates a clock frozen at the real current time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward. A step past chrono's range leaves the clock
    /// where it is.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = ChronoDuration::from_std(by)
            .ok()
            .and_then(|delta| current.checked_add_signed(delta))
        {
            *current = next;
        }
    }

    /// Jumps to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

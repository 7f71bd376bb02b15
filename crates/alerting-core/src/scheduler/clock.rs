//! Wall clock anchored to the runtime timer.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Maps runtime instants to wall-clock times.
///
/// Anchoring to [`tokio::time::Instant`] keeps evaluation timestamps exact
/// multiples of the rule interval, including under a paused test clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    /// A clock anchored at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// A clock whose current instant reads as `wall`.
    #[must_use]
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            wall,
            anchor: Instant::now(),
        }
    }

    /// Current wall time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.at(Instant::now())
    }

    /// Wall time of a runtime instant.
    #[must_use]
    pub fn at(&self, instant: Instant) -> DateTime<Utc> {
        let offset = instant.saturating_duration_since(self.anchor);
        self.wall + chrono::Duration::from_std(offset).unwrap_or_default()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

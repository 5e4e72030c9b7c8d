//! Engine time source

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock timestamps that advance with tokio's clock
///
/// Anchored to `Utc::now()` when created and moved forward by
/// [`tokio::time::Instant`], so retry due times written and checked by the
/// engine follow paused or auto-advanced time in tests.
#[derive(Debug, Clone, Copy)]
pub struct EngineClock {
    wall: DateTime<Utc>,
    anchor: Instant,
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineClock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.anchor.elapsed())
            .ok()
            .and_then(|elapsed| self.wall.checked_add_signed(elapsed))
            .unwrap_or(self.wall)
    }

    /// `now + delay`, saturating
    pub fn after(&self, delay: Duration) -> DateTime<Utc> {
        let now = self.now();
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left until `due`; `None` once it has passed
    pub fn until(&self, due: DateTime<Utc>) -> Option<Duration> {
        (due - self.now())
            .to_std()
            .ok()
            .filter(|remaining| !remaining.is_zero())
    }
}

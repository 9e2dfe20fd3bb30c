//! Variable-rate polling interval.
//!
//! [`DynamicInterval`] is a pure state machine: it is handed the current time
//! and answers how long to wait before the next round. Right after a reset the
//! wait is `min`; it then eases towards `max` over `duration`, following an
//! ease-in-exponential curve, so a busy peer polls fast and an idle one backs
//! off slowly at first and then sharply.

use std::time::{Duration, Instant};

/// Ease-in-exponential on `[0, 1]`.
pub fn ease_in_expo(x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        2f64.powf(10.0 * x.min(1.0) - 10.0)
    }
}

#[derive(Debug, Clone)]
pub struct DynamicInterval {
    min: Duration,
    max: Duration,
    duration: Duration,
    last_reset: Instant,
}

impl DynamicInterval {
    /// `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration, duration: Duration, now: Instant) -> Self {
        Self {
            min,
            max: max.max(min),
            duration,
            last_reset: now,
        }
    }

    /// Restart the backoff: the next delay is `min` again.
    pub fn reset(&mut self, now: Instant) {
        self.last_reset = now;
    }

    /// Delay before the next round.
    pub fn next_delay(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_reset);
        let f = if self.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
        };
        let eased = ease_in_expo(f);
        if eased >= 1.0 {
            return self.max;
        }
        let spread = (self.max - self.min).as_secs_f64();
        (self.min + Duration::from_secs_f64(spread * eased)).min(self.max)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn last_reset(&self) -> Instant {
        self.last_reset
    }
}

//! Heartbeat scheduling with randomized jitter.
//!
//! Each cycle computes its delay after the previous cycle's work completes,
//! so cycles never overlap and hosts sharing a base interval drift apart
//! instead of bursting in lockstep.

use std::time::Duration;

use rand::Rng;

/// Heartbeat interval with uniform random jitter.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    interval: Duration,
    jitter: Duration,
}

impl Schedule {
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }

    /// Delay before the next cycle, drawn uniformly from
    /// `[interval - jitter, interval + jitter]`. When `jitter >= interval`
    /// the lower bound clamps to `interval` so the delay can never reach
    /// zero; zero jitter yields exactly `interval`.
    pub fn next_delay(&self) -> Duration {
        self.delay_with(&mut rand::thread_rng())
    }

    fn delay_with<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }

        let low = if self.jitter >= self.interval {
            self.interval
        } else {
            self.interval - self.jitter
        };
        let high = self.interval + self.jitter;
        let nanos = rng.gen_range(low.as_nanos() as u64..=high.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

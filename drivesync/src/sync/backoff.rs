use std::time::Duration;

use rand::Rng;

/// Delay schedule for polling a remote operation until it settles.
///
/// Delays double from `base` up to `max`. With jitter, half of each delay is
/// fixed and the other half random, so pollers never spin at zero delay.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool, attempts: u32) -> Self {
        Self {
            base,
            max,
            jitter,
            attempts,
        }
    }

    /// Schedule used while waiting for asynchronous remote deletes.
    pub fn polling() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10), true, 10)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        if !self.jitter {
            return Duration::from_millis(exp);
        }
        let half = exp / 2;
        Duration::from_millis(half + rng.gen_range(0..=exp - half))
    }
}

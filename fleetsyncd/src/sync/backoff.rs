use std::time::Duration;

use rand::Rng;

/// Exponential reconnect delay with optional full jitter. Tracks its own
/// attempt counter so stream loops only call `next_delay`/`reset`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            max,
            jitter,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let mut rng = rand::thread_rng();
        self.next_delay_with_rng(&mut rng)
    }

    pub fn next_delay_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter {
            Duration::from_millis(rng.gen_range(0..=ceiling))
        } else {
            Duration::from_millis(ceiling)
        }
    }

    fn ceiling(&self, attempt: u32) -> u64 {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms)
    }
}

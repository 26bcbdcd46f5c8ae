use rand::Rng;
use std::time::Duration;

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 16;

/// Bounded exponential backoff with equal jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Upper bound of the delay before retry number `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry number `attempt`, uniformly drawn from the upper
    /// half of [`ceiling`](Self::ceiling).
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = u64::try_from((ceiling - half).as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=spread);
        half + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let backoff = Backoff::from_millis(500, 30_000);
        assert_eq!(backoff.ceiling(0), Duration::from_millis(500));
        assert_eq!(backoff.ceiling(1), Duration::from_millis(1_000));
        assert_eq!(backoff.ceiling(5), Duration::from_millis(16_000));
        assert_eq!(backoff.ceiling(6), Duration::from_millis(30_000));
        assert_eq!(backoff.ceiling(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let backoff = Backoff::from_millis(1_000, 60_000);
        for attempt in 0..10 {
            let ceiling = backoff.ceiling(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
                assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
            }
        }
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let backoff = Backoff::from_millis(2_000, 10);
        assert_eq!(backoff.ceiling(3), Duration::from_millis(2_000));
    }
}

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with jitter.
///
/// Delays double on every failed attempt, starting from a base delay, with
/// ±10% jitter so a fleet of collectors does not retry in lockstep.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given number of retries after the first
    /// failed attempt.
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self { max_retries, base }
    }

    /// Number of retries after the first failed attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let millis = self.base.as_millis() as u64 * (1u64 << exp);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_millis((millis as f64 * jitter) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_with_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        for (attempt, expected) in [(0, 100u64), (1, 200), (2, 400), (3, 800), (4, 1600)] {
            let delay = policy.delay(attempt).as_millis() as u64;
            let low = expected * 9 / 10;
            let high = expected * 11 / 10;
            assert!(
                (low..=high).contains(&delay),
                "delay {delay} for attempt {attempt} outside [{low}, {high}]"
            );
        }
    }

    #[test]
    fn test_exponent_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        // Large attempt numbers must not overflow.
        let _ = policy.delay(1000);
    }
}

use std::time::Duration;

/// Exponential backoff schedule shared by sensor reconnects and sync retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay for a 1-based attempt number: `initial * factor^(attempt-1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.max(1.0).powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let b = Backoff::default();
        let secs: Vec<u64> = (1..=9).map(|a| b.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn attempt_zero_is_initial() {
        let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(b.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(b.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(b.delay_for_attempt(2), Duration::from_secs(10));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let b = Backoff::default();
        assert_eq!(b.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }
}

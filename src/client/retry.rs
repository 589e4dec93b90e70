use std::time::Duration;

/// Decides how long the probe loop waits before its next cycle.
pub trait RetryPolicy: Send + Sync {
    /// `consecutive_failures` is zero after an answered probe.
    fn delay(&self, consecutive_failures: u32) -> Duration;
}

/// Same wait after every cycle, no backoff and no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval(pub Duration);

impl RetryPolicy for FixedInterval {
    fn delay(&self, _consecutive_failures: u32) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_interval_ignores_failures() {
        let policy = FixedInterval(Duration::from_secs(3));
        assert_eq!(policy.delay(0), Duration::from_secs(3));
        assert_eq!(policy.delay(1), Duration::from_secs(3));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(3));
    }
}

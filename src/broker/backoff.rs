use std::time::Duration;

/// Exponential reconnect delay: doubles after each failure up to `max`,
/// back to `initial` after a successful connect.
#[derive(Debug, Clone)]
pub struct BackoffController {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl BackoffController {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms.max(1));
        let max = Duration::from_millis(max_ms.max(initial_ms.max(1)));
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Records a failure and returns how long to wait before retrying
    pub fn mark_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Resets the delay after a successful connect
    pub fn mark_success(&mut self) {
        self.current = self.initial;
    }

    /// Delay the next failure would produce
    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = BackoffController::new(500, 3_000);
        assert_eq!(backoff.mark_failure(), Duration::from_millis(500));
        assert_eq!(backoff.mark_failure(), Duration::from_millis(1_000));
        assert_eq!(backoff.mark_failure(), Duration::from_millis(2_000));
        assert_eq!(backoff.mark_failure(), Duration::from_millis(3_000));
        assert_eq!(backoff.mark_failure(), Duration::from_millis(3_000));
    }

    #[test]
    fn test_backoff_resets_on_success() {
        let mut backoff = BackoffController::new(100, 10_000);
        backoff.mark_failure();
        backoff.mark_failure();
        assert_eq!(backoff.current(), Duration::from_millis(400));
        backoff.mark_success();
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_clamps_bad_bounds() {
        let mut backoff = BackoffController::new(0, 0);
        assert_eq!(backoff.mark_failure(), Duration::from_millis(1));
        assert_eq!(backoff.mark_failure(), Duration::from_millis(1));
    }
}

use std::time::Duration;

/// Fixed-interval schedule with a hard attempt ceiling.
///
/// Polling loops ask for the next delay after every unsuccessful attempt;
/// `None` means the ceiling has been reached and the caller must give up.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    interval: Duration,
    max_attempts: u32,
    current_attempt: u32,
}

impl FixedBackoff {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            current_attempt: 0,
        }
    }

    /// Record an attempt and return how long to wait before the next one
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.current_attempt += 1;
        if self.is_exhausted() {
            None
        } else {
            Some(self.interval)
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_interval_is_constant() {
        let mut backoff = FixedBackoff::new(Duration::from_millis(100), 5);

        for _ in 0..4 {
            assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        }
        assert_eq!(backoff.current_attempt(), 4);
    }

    #[test]
    fn test_fixed_backoff_ceiling() {
        let mut backoff = FixedBackoff::new(Duration::from_millis(10), 3);

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        // third attempt was the last one
        assert_eq!(backoff.next_delay(), None);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.current_attempt(), 3);
    }

    #[test]
    fn test_fixed_backoff_reset() {
        let mut backoff = FixedBackoff::new(Duration::from_millis(10), 2);
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.current_attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_zero_attempts_is_exhausted_immediately() {
        let mut backoff = FixedBackoff::new(Duration::from_millis(10), 0);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_fixed_backoff_default() {
        let backoff = FixedBackoff::default();
        assert_eq!(backoff.interval(), Duration::from_secs(5));
        assert_eq!(backoff.max_attempts(), 60);
    }
}

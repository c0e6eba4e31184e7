use std::time::{Duration, Instant};

/// Exponential reconnect schedule: the delay doubles after each failure up
/// to `max`, and a success resets it.
#[derive(Debug, Clone)]
pub struct BackoffController {
    initial: Duration,
    max: Duration,
    current: Duration,
    next_attempt: Option<Instant>,
    attempts: u64,
}

impl BackoffController {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms.max(1));
        let max = Duration::from_millis(max_ms.max(initial_ms).max(1));
        Self {
            initial,
            max,
            current: initial,
            next_attempt: None,
            attempts: 0,
        }
    }

    pub fn should_retry(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| now >= at)
    }

    pub fn mark_failure(&mut self, now: Instant) {
        self.attempts += 1;
        self.next_attempt = Some(now + self.current);
        self.current = (self.current * 2).min(self.max);
    }

    pub fn mark_success(&mut self, _now: Instant) {
        self.current = self.initial;
        self.next_attempt = None;
        self.attempts = 0;
    }

    /// Delay that the next failure will schedule.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Consecutive failures since the last success.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Time left before the next attempt is due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_attempt
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let start = Instant::now();
        let mut backoff = BackoffController::new(100, 350);
        assert!(backoff.should_retry(start));
        backoff.mark_failure(start);
        assert!(!backoff.should_retry(start));
        assert!(backoff.should_retry(start + Duration::from_millis(100)));
        backoff.mark_failure(start);
        backoff.mark_failure(start);
        assert_eq!(backoff.current_delay(), Duration::from_millis(350));
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn success_resets_schedule() {
        let now = Instant::now();
        let mut backoff = BackoffController::new(100, 1000);
        backoff.mark_failure(now);
        backoff.mark_failure(now);
        backoff.mark_success(now);
        assert!(backoff.should_retry(now));
        assert_eq!(backoff.current_delay(), Duration::from_millis(100));
        assert_eq!(backoff.remaining(now), Duration::ZERO);
    }
}

//! Reconnect backoff policy (spec §4.4): exponential with a configurable
//! initial delay, cap, and multiplier. Resets on a successful connection.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self { initial, max, multiplier, current: initial }
    }

    /// Returns the delay to wait before the next attempt, then advances
    /// the internal state for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let scaled = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::from_secs_f64(scaled).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_max_delay() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(8), 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 2.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}

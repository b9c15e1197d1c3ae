//! Emit Throttle
//!
//! Tracks the last delivery time per symbol and enforces a minimum interval
//! between outbound notifications. Only delivery is throttled; aggregation
//! state is updated for every tick regardless.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::streaming::Symbol;

/// Default minimum interval between two deliveries for the same symbol.
pub const DEFAULT_MIN_EMIT_INTERVAL: Duration = Duration::from_millis(1000);

/// Per-symbol minimum-interval gate.
#[derive(Debug)]
pub struct EmitThrottle {
    min_interval: Duration,
    last_delivered: HashMap<Symbol, Instant>,
}

impl Default for EmitThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_EMIT_INTERVAL)
    }
}

impl EmitThrottle {
    /// Create a throttle with the given minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_delivered: HashMap::new(),
        }
    }

    /// Configured minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Decide whether an update for `symbol` observed at `now` is delivered.
    ///
    /// Records `now` as the last delivery when it returns `true`.
    pub fn admit(&mut self, symbol: &str, now: Instant) -> bool {
        match self.last_delivered.get_mut(symbol) {
            Some(last) if now.saturating_duration_since(*last) < self.min_interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.last_delivered.insert(symbol.to_string(), now);
                true
            }
        }
    }

    /// Last delivery time for a symbol.
    #[must_use]
    pub fn last_delivered(&self, symbol: &str) -> Option<Instant> {
        self.last_delivered.get(symbol).copied()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn first_update_always_admitted() {
        let mut throttle = EmitThrottle::default();
        assert!(throttle.admit("SYM", Instant::now()));
    }

    #[test_case(400, false ; "within interval is dropped")]
    #[test_case(999, false ; "just below interval is dropped")]
    #[test_case(1000, true ; "exactly at interval is delivered")]
    #[test_case(1200, true ; "past interval is delivered")]
    fn second_update(gap_ms: u64, delivered: bool) {
        let mut throttle = EmitThrottle::default();
        let start = Instant::now();

        assert!(throttle.admit("SYM", start));
        assert_eq!(
            throttle.admit("SYM", start + Duration::from_millis(gap_ms)),
            delivered
        );
    }

    #[test]
    fn dropped_update_does_not_reset_window() {
        let mut throttle = EmitThrottle::default();
        let start = Instant::now();

        assert!(throttle.admit("SYM", start));
        assert!(!throttle.admit("SYM", start + Duration::from_millis(600)));
        // Measured from the last delivery, not the last attempt.
        assert!(throttle.admit("SYM", start + Duration::from_millis(1000)));
        assert_eq!(
            throttle.last_delivered("SYM"),
            Some(start + Duration::from_millis(1000))
        );
    }

    #[test]
    fn symbols_are_independent() {
        let mut throttle = EmitThrottle::default();
        let start = Instant::now();

        assert!(throttle.admit("A", start));
        assert!(throttle.admit("B", start + Duration::from_millis(10)));
        assert!(!throttle.admit("A", start + Duration::from_millis(20)));
    }
}

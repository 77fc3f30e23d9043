// Per-second rates for monotonically increasing counters.

use std::collections::HashMap;
use std::time::Instant;

/// Remembers the last value and time per key. First observation of a key yields 0.0;
/// counter resets (negative deltas) clamp to 0.0.
#[derive(Debug, Default)]
pub struct RateCalculator {
    last: HashMap<String, (f64, Instant)>,
}

impl RateCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate(&mut self, key: &str, value: f64) -> f64 {
        self.rate_at(key, value, Instant::now())
    }

    pub fn rate_at(&mut self, key: &str, value: f64, now: Instant) -> f64 {
        let Some((prev_value, prev_at)) = self.last.insert(key.to_string(), (value, now)) else {
            return 0.0;
        };
        let dt = now.saturating_duration_since(prev_at).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        ((value - prev_value) / dt).max(0.0)
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}

/// Round to two decimals (payload readability).
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_observation_is_zero() {
        let mut r = RateCalculator::new();
        assert_eq!(r.rate_at("bytes", 1024.0, Instant::now()), 0.0);
    }

    #[test]
    fn rate_is_delta_over_elapsed() {
        let mut r = RateCalculator::new();
        let t0 = Instant::now();
        r.rate_at("bytes", 1000.0, t0);
        let rate = r.rate_at("bytes", 3000.0, t0 + Duration::from_secs(2));
        assert_eq!(rate, 1000.0);
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let mut r = RateCalculator::new();
        let t0 = Instant::now();
        r.rate_at("bytes", 5000.0, t0);
        assert_eq!(r.rate_at("bytes", 10.0, t0 + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn zero_elapsed_is_zero() {
        let mut r = RateCalculator::new();
        let t0 = Instant::now();
        r.rate_at("bytes", 1.0, t0);
        assert_eq!(r.rate_at("bytes", 100.0, t0), 0.0);
    }
}

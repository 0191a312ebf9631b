use std::time::Duration;

use rand::Rng;

use crate::config::{EnricherConfig, MAX_RETRY_DELAY_SECS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub delay_min: f64,
    pub delay_max: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &EnricherConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            delay_min: config.retry_delay_min,
            delay_max: config.retry_delay_max,
        }
    }

    /// Uniform random delay in `[delay_min, delay_max]` seconds.
    ///
    /// Bounds are clamped to `[0, MAX_RETRY_DELAY_SECS]`; NaN counts as 0.
    pub fn jittered_delay(&self) -> Duration {
        let (a, b) = (bounded(self.delay_min), bounded(self.delay_max));
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let secs = if high > low {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

fn bounded(secs: f64) -> f64 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_RETRY_DELAY_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay_min: 0.5,
            delay_max: 2.0,
        };
        for _ in 0..500 {
            let delay = policy.jittered_delay();
            assert!(delay >= Duration::from_millis(500), "{:?}", delay);
            assert!(delay <= Duration::from_millis(2000), "{:?}", delay);
        }
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            max_attempts: 1,
            delay_min: 0.0,
            delay_max: 0.0,
        };
        assert_eq!(policy.jittered_delay(), Duration::ZERO);
    }

    #[test]
    fn test_out_of_range_delays_do_not_panic() {
        let max = Duration::from_secs_f64(MAX_RETRY_DELAY_SECS);
        for (delay_min, delay_max) in [(0.5, 1e30), (f64::INFINITY, f64::INFINITY), (f64::NAN, 2.0), (-5.0, -1.0)] {
            let policy = RetryPolicy {
                max_attempts: 2,
                delay_min,
                delay_max,
            };
            assert!(policy.jittered_delay() <= max);
        }
    }
}

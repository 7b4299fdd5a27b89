use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before the next attempt of a failed step.
pub trait Backoff: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn delay(&self, attempt: u32) -> Duration;
}

/// `base * factor^(attempt-1)`, capped at `max`, with ± `jitter` spread.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    pub jitter: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            factor: config.factor.max(1.0),
            max: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    fn nominal_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        (self.base.as_millis() as f64 * self.factor.powi(exponent)).min(self.max.as_millis() as f64)
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_ms(attempt);
        if nominal <= 0.0 {
            return Duration::ZERO;
        }
        let spread = nominal * self.jitter;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let ms = (nominal + jitter).clamp(0.0, self.max.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: f64) -> ExponentialBackoff {
        ExponentialBackoff::from_config(&RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            factor: 2.0,
            max_delay_ms: 500,
            jitter,
        })
    }

    #[test]
    fn grows_exponentially_and_caps() {
        let b = backoff(0.0);
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
        assert_eq!(b.delay(4), Duration::from_millis(500));
        assert_eq!(b.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_band() {
        let b = backoff(0.2);
        for _ in 0..100 {
            let d = b.delay(2).as_millis();
            assert!((160..=240).contains(&d), "delay {d} out of band");
        }
    }

    #[test]
    fn zero_base_means_no_wait() {
        let b = ExponentialBackoff::from_config(&RetryConfig::immediate(3));
        assert_eq!(b.delay(1), Duration::ZERO);
        assert_eq!(b.delay(3), Duration::ZERO);
        assert_eq!(NoBackoff.delay(9), Duration::ZERO);
    }
}

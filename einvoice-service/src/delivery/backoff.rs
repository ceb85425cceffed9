//! Capped exponential backoff with symmetric jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::DeliveryConfig;

/// Retry policy for one delivery.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Fractional jitter applied in both directions, e.g. `0.15` for ±15 %.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(DeliveryConfig::default())
    }
}

impl From<DeliveryConfig> for RetryPolicy {
    fn from(config: DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.base_backoff,
            cap: config.max_backoff,
            jitter: 0.15,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `completed + 1`, without jitter.
    pub fn nominal_delay(&self, completed: u32) -> Duration {
        let exponent = completed.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent);
        delay.min(self.cap)
    }

    /// Delay before attempt `completed + 1`.
    pub fn delay_after(&self, completed: u32) -> Duration {
        let nominal = self.nominal_delay(completed);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(200),
            cap: Duration::from_secs(5),
            jitter: 0.15,
        }
    }

    #[test]
    fn doubles_until_capped() {
        let p = policy();
        assert_eq!(p.nominal_delay(1), Duration::from_millis(200));
        assert_eq!(p.nominal_delay(2), Duration::from_millis(400));
        assert_eq!(p.nominal_delay(4), Duration::from_millis(1600));
        assert_eq!(p.nominal_delay(6), Duration::from_secs(5));
        assert_eq!(p.nominal_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_fifteen_percent() {
        let p = policy();
        for _ in 0..200 {
            let d = p.delay_after(3).as_secs_f64();
            assert!((0.8 * 0.85 - 1e-9..=0.8 * 1.15 + 1e-9).contains(&d), "{d}");
        }
    }

    #[test]
    fn zero_base_never_sleeps() {
        let p = RetryPolicy {
            base: Duration::ZERO,
            ..policy()
        };
        assert_eq!(p.delay_after(3), Duration::ZERO);
    }
}

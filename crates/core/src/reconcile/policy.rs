use std::time::Duration;

use rand::Rng;

use crate::config::PollConfig;

/// Bounded exponential backoff for status polling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
    /// Upper bound of random extra delay, as a percentage of the base delay.
    pub jitter_pct: u8,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(120),
            multiplier: 2,
            max_attempts: 60,
            jitter_pct: 10,
        }
    }
}

impl PollPolicy {
    /// No waiting between polls; only the attempt bound applies.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 1,
            max_attempts,
            jitter_pct: 0,
        }
    }

    pub fn operations(config: &PollConfig) -> Self {
        Self::from_config(config, config.operation_interval_secs)
    }

    pub fn readiness(config: &PollConfig) -> Self {
        Self::from_config(config, config.readiness_interval_secs)
    }

    fn from_config(config: &PollConfig, initial_secs: u64) -> Self {
        Self {
            initial_interval: Duration::from_secs(initial_secs),
            max_interval: Duration::from_secs(config.max_interval_secs.max(initial_secs)),
            multiplier: config.multiplier.max(1),
            max_attempts: config.max_attempts.max(1),
            jitter_pct: config.jitter_pct.min(100),
        }
    }

    /// Deterministic part of the delay after the given zero-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        let initial_ms = self.initial_interval.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max_interval.as_millis().min(u128::from(u64::MAX)) as u64;
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() || self.jitter_pct == 0 {
            return base;
        }

        let base_ms = base.as_millis() as u64;
        let spread = base_ms.saturating_mul(u64::from(self.jitter_pct)) / 100;
        let extra = if spread == 0 { 0 } else { rand::thread_rng().gen_range(0..=spread) };
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry and rate limiting parameters of one size tier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryTierConfig {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on every further retry.
    pub base_delay_ms: u64,
    /// Upper bound of the backoff delay.
    pub max_delay_ms: u64,
    /// Minimum spacing between two consecutive statements on the same session.
    #[serde(default)]
    pub min_statement_interval_ms: u64,
}

impl RetryTierConfig {
    pub const fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        min_statement_interval_ms: u64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            min_statement_interval_ms,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn min_statement_interval(&self) -> Duration {
        Duration::from_millis(self.min_statement_interval_ms)
    }

    fn validate(&self, tier: &'static str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::RetryMaxAttemptsZero { tier });
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err(ValidationError::RetryDelayInverted { tier });
        }

        Ok(())
    }
}

/// Connection resilience settings, tiered by estimated table size.
///
/// Larger tables run longer statements over longer sessions, so their tiers allow more
/// attempts, longer delays and a wider spacing between statements.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    #[serde(default = "default_tiny")]
    pub tiny: RetryTierConfig,
    #[serde(default = "default_small")]
    pub small: RetryTierConfig,
    #[serde(default = "default_medium")]
    pub medium: RetryTierConfig,
    #[serde(default = "default_large")]
    pub large: RetryTierConfig,
}

impl ResilienceConfig {
    pub const DEFAULT_TINY: RetryTierConfig = RetryTierConfig::new(3, 500, 10_000, 0);

    pub const DEFAULT_SMALL: RetryTierConfig = RetryTierConfig::new(3, 500, 10_000, 10);

    pub const DEFAULT_MEDIUM: RetryTierConfig = RetryTierConfig::new(5, 1_000, 30_000, 50);

    pub const DEFAULT_LARGE: RetryTierConfig = RetryTierConfig::new(8, 2_000, 60_000, 100);

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tiny.validate("tiny")?;
        self.small.validate("small")?;
        self.medium.validate("medium")?;
        self.large.validate("large")?;

        Ok(())
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            tiny: default_tiny(),
            small: default_small(),
            medium: default_medium(),
            large: default_large(),
        }
    }
}

fn default_tiny() -> RetryTierConfig {
    ResilienceConfig::DEFAULT_TINY
}

fn default_small() -> RetryTierConfig {
    ResilienceConfig::DEFAULT_SMALL
}

fn default_medium() -> RetryTierConfig {
    ResilienceConfig::DEFAULT_MEDIUM
}

fn default_large() -> RetryTierConfig {
    ResilienceConfig::DEFAULT_LARGE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_tiers_are_more_patient() {
        let config = ResilienceConfig::default();
        assert!(config.large.max_attempts > config.medium.max_attempts);
        assert!(config.medium.max_attempts >= config.small.max_attempts);
        assert!(config.large.max_delay() > config.tiny.max_delay());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_delays_are_rejected() {
        let config = ResilienceConfig {
            medium: RetryTierConfig::new(3, 5_000, 1_000, 0),
            ..ResilienceConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::RetryDelayInverted { tier: "medium" })
        );
    }
}

use std::time::Duration;

use rand::Rng;
use tiersync_config::shared::{ResilienceConfig, RetryTierConfig};

use crate::profile::SizeCategory;

/// Largest share of the backoff added as random jitter.
const MAX_JITTER_FACTOR: f64 = 0.1;

/// Retry and rate limiting parameters of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts of a statement, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Minimum spacing between the starts of two consecutive statements.
    pub min_statement_interval: Duration,
}

impl RetryPolicy {
    pub fn from_tier(tier: &RetryTierConfig) -> Self {
        Self {
            max_attempts: tier.max_attempts.max(1),
            base_delay: tier.base_delay(),
            max_delay: tier.max_delay(),
            min_statement_interval: tier.min_statement_interval(),
        }
    }

    /// Selects the tier matching a table's size category.
    pub fn for_category(config: &ResilienceConfig, category: SizeCategory) -> Self {
        let tier = match category {
            SizeCategory::Tiny => &config.tiny,
            SizeCategory::Small => &config.small,
            SizeCategory::Medium => &config.medium,
            SizeCategory::Large => &config.large,
        };

        Self::from_tier(tier)
    }

    /// Delay before retry number `retry` (0 for the first retry): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`RetryPolicy::backoff`] plus a small random jitter, still capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        let jitter_factor = rand::rng().random::<f64>() * MAX_JITTER_FACTOR;
        backoff
            .mul_f64(1.0 + jitter_factor)
            .min(self.max_delay)
    }
}

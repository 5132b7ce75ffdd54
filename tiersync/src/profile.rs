//! Size classification of tables and the batch sizes and throughput derived from it.

use std::fmt;

use serde::Serialize;
use tiersync_config::shared::{BatchConfig, TableSpec};

use crate::state::CopyProgress;

const MB: f64 = 1.0;
const GB: f64 = 1024.0 * MB;

/// Size category of a table, derived from its estimated rows and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Tiny,
    Small,
    Medium,
    Large,
}

impl SizeCategory {
    /// Classifies a table. Both the row count and the size must be under a category's limits.
    pub fn classify(rows: u64, size_mb: f64) -> SizeCategory {
        if rows < 10_000 && size_mb < 10.0 * MB {
            SizeCategory::Tiny
        } else if rows < 100_000 && size_mb < 100.0 * MB {
            SizeCategory::Small
        } else if rows < 2_000_000 && size_mb < 2.0 * GB {
            SizeCategory::Medium
        } else {
            SizeCategory::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeCategory::Tiny => "tiny",
            SizeCategory::Small => "small",
            SizeCategory::Medium => "medium",
            SizeCategory::Large => "large",
        }
    }

    /// Smallest and largest batch an explicit `batch_size` is clamped to.
    pub fn batch_bounds(&self) -> (usize, usize) {
        match self {
            SizeCategory::Tiny => (100, 1_000),
            SizeCategory::Small => (1_000, 10_000),
            SizeCategory::Medium => (5_000, 50_000),
            SizeCategory::Large => (10_000, 100_000),
        }
    }

    pub fn default_batch_size(&self, config: &BatchConfig) -> usize {
        match self {
            SizeCategory::Tiny => config.tiny_rows,
            SizeCategory::Small => config.small_rows,
            SizeCategory::Medium => config.medium_rows,
            SizeCategory::Large => config.large_rows,
        }
    }

    /// Rows per second a healthy copy of a table of this category is expected to reach.
    pub fn expected_throughput(&self) -> f64 {
        match self {
            SizeCategory::Tiny => 1_000.0,
            SizeCategory::Small => 5_000.0,
            SizeCategory::Medium => 20_000.0,
            SizeCategory::Large => 50_000.0,
        }
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-persisted performance expectations of a table for the current run.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceProfile {
    pub category: SizeCategory,
    pub batch_size: usize,
    /// Category default throughput in rows per second.
    pub expected_throughput: f64,
    /// Throughput measured by the last successful copy, if any.
    pub observed_throughput: Option<f64>,
}

impl PerformanceProfile {
    pub fn derive(spec: &TableSpec, batch: &BatchConfig, prior: Option<&CopyProgress>) -> Self {
        let category = SizeCategory::classify(spec.estimated_rows, spec.estimated_size_mb);
        let batch_size = match spec.batch_size {
            Some(requested) => {
                let (min, max) = category.batch_bounds();
                requested.clamp(min, max)
            }
            None => category.default_batch_size(batch),
        };

        Self {
            category,
            batch_size,
            expected_throughput: category.expected_throughput(),
            observed_throughput: prior.and_then(CopyProgress::observed_throughput),
        }
    }

    /// Throughput to plan with: the observed one when known, the category default otherwise.
    pub fn effective_throughput(&self) -> f64 {
        self.observed_throughput
            .unwrap_or(self.expected_throughput)
    }

    /// Returns `true` when the last observed throughput is below `ratio` of the expectation.
    pub fn is_poor(&self, ratio: f64) -> bool {
        self.observed_throughput
            .is_some_and(|observed| observed < self.expected_throughput * ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CopyStatus;
    use chrono::Utc;

    #[test]
    fn classification_needs_both_limits() {
        assert_eq!(SizeCategory::classify(9_999, 9.0), SizeCategory::Tiny);
        assert_eq!(SizeCategory::classify(9_999, 10.0), SizeCategory::Small);
        assert_eq!(SizeCategory::classify(150_000, 50.0), SizeCategory::Medium);
        assert_eq!(SizeCategory::classify(1_000, 4_096.0), SizeCategory::Large);
        assert_eq!(SizeCategory::classify(30_000_000, 0.0), SizeCategory::Large);
    }

    #[test]
    fn explicit_batch_size_is_clamped() {
        let batch = BatchConfig::default();
        let spec = TableSpec::full("orders")
            .with_estimates(5_000_000, 8_000.0)
            .with_batch_size(500);
        let profile = PerformanceProfile::derive(&spec, &batch, None);
        assert_eq!(profile.category, SizeCategory::Large);
        assert_eq!(profile.batch_size, 10_000);
    }

    #[test]
    fn default_batch_size_comes_from_config() {
        let batch = BatchConfig::default();
        let spec = TableSpec::full("patient").with_estimates(3, 0.01);
        let profile = PerformanceProfile::derive(&spec, &batch, None);
        assert_eq!(profile.batch_size, batch.tiny_rows);
        assert_eq!(profile.effective_throughput(), 1_000.0);
    }

    #[test]
    fn observed_throughput_overrides_expectation() {
        let prior = CopyProgress {
            table_name: "orders".to_string(),
            rows_copied: 10_000,
            status: CopyStatus::Success,
            last_primary_value: None,
            primary_column_name: None,
            copy_duration_ms: 100_000,
            last_success_at: Some(Utc::now()),
            updated_at: Utc::now(),
        };
        let spec = TableSpec::full("orders").with_estimates(50_000, 20.0);
        let profile = PerformanceProfile::derive(&spec, &BatchConfig::default(), Some(&prior));
        assert_eq!(profile.effective_throughput(), 100.0);
        assert!(profile.is_poor(0.25));
        assert!(!profile.is_poor(0.01));
    }
}

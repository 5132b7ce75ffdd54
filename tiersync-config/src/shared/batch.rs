use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default rows per extraction batch for each size category.
///
/// A table's own `batch_size` takes precedence, clamped to the bounds of its category.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    #[serde(default = "default_tiny_rows")]
    pub tiny_rows: usize,
    #[serde(default = "default_small_rows")]
    pub small_rows: usize,
    #[serde(default = "default_medium_rows")]
    pub medium_rows: usize,
    #[serde(default = "default_large_rows")]
    pub large_rows: usize,
}

impl BatchConfig {
    pub const DEFAULT_TINY_ROWS: usize = 500;

    pub const DEFAULT_SMALL_ROWS: usize = 5_000;

    pub const DEFAULT_MEDIUM_ROWS: usize = 20_000;

    pub const DEFAULT_LARGE_ROWS: usize = 50_000;

    /// Validates that every category has a non-zero batch size.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let categories = [
            ("tiny", self.tiny_rows),
            ("small", self.small_rows),
            ("medium", self.medium_rows),
            ("large", self.large_rows),
        ];

        for (category, rows) in categories {
            if rows == 0 {
                return Err(ValidationError::BatchSizeZero { category });
            }
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            tiny_rows: default_tiny_rows(),
            small_rows: default_small_rows(),
            medium_rows: default_medium_rows(),
            large_rows: default_large_rows(),
        }
    }
}

fn default_tiny_rows() -> usize {
    BatchConfig::DEFAULT_TINY_ROWS
}

fn default_small_rows() -> usize {
    BatchConfig::DEFAULT_SMALL_ROWS
}

fn default_medium_rows() -> usize {
    BatchConfig::DEFAULT_MEDIUM_ROWS
}

fn default_large_rows() -> usize {
    BatchConfig::DEFAULT_LARGE_ROWS
}

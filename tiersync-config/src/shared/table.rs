use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How a table is copied from the source to the replica.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Truncates the replica table and copies every row.
    #[default]
    Full,
    /// Copies only rows past the last recorded incremental value.
    Incremental,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Full => "full",
            ExtractionStrategy::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling precedence of a table. Variants are ordered from most to least important.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceTier {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl ImportanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceTier::Critical => "critical",
            ImportanceTier::High => "high",
            ImportanceTier::Normal => "normal",
            ImportanceTier::Low => "low",
        }
    }
}

impl fmt::Display for ImportanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-table settings as they appear in the configuration file, keyed by table name.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TableSettings {
    #[serde(default)]
    pub extraction_strategy: ExtractionStrategy,
    /// Ordered incremental columns. The first one is the watermark column.
    #[serde(default)]
    pub incremental_columns: Vec<String>,
    /// Rows per extraction batch. Falls back to the size category default when absent.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub estimated_size_mb: f64,
    #[serde(default)]
    pub estimated_rows: u64,
    #[serde(default)]
    pub importance_tier: ImportanceTier,
}

/// Immutable description of one table for the duration of a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub extraction_strategy: ExtractionStrategy,
    pub incremental_columns: Vec<String>,
    pub batch_size: Option<usize>,
    pub estimated_size_mb: f64,
    pub estimated_rows: u64,
    pub importance_tier: ImportanceTier,
}

impl TableSpec {
    pub fn from_settings(name: impl Into<String>, settings: TableSettings) -> Self {
        Self {
            name: name.into(),
            extraction_strategy: settings.extraction_strategy,
            incremental_columns: settings.incremental_columns,
            batch_size: settings.batch_size,
            estimated_size_mb: settings.estimated_size_mb,
            estimated_rows: settings.estimated_rows,
            importance_tier: settings.importance_tier,
        }
    }

    /// Shorthand for a `full` table with no size estimate.
    pub fn full(name: impl Into<String>) -> Self {
        Self::from_settings(name, TableSettings::default())
    }

    /// Shorthand for an `incremental` table tracked by the given columns.
    pub fn incremental<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_settings(
            name,
            TableSettings {
                extraction_strategy: ExtractionStrategy::Incremental,
                incremental_columns: columns.into_iter().map(Into::into).collect(),
                ..TableSettings::default()
            },
        )
    }

    pub fn with_estimates(mut self, rows: u64, size_mb: f64) -> Self {
        self.estimated_rows = rows;
        self.estimated_size_mb = size_mb;
        self
    }

    pub fn with_tier(mut self, tier: ImportanceTier) -> Self {
        self.importance_tier = tier;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Returns the column whose value is persisted as the watermark.
    pub fn primary_incremental_column(&self) -> Option<&str> {
        self.incremental_columns.first().map(String::as_str)
    }

    pub fn is_incremental(&self) -> bool {
        self.extraction_strategy == ExtractionStrategy::Incremental
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_incremental() && self.incremental_columns.is_empty() {
            return Err(ValidationError::IncrementalColumnsMissing {
                table: self.name.clone(),
            });
        }

        if self.batch_size == Some(0) {
            return Err(ValidationError::TableBatchSizeZero {
                table: self.name.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: TableSettings = serde_json::from_value(serde_json::json!({
            "extraction_strategy": "incremental",
            "incremental_columns": ["DateModified", "Id"],
            "importance_tier": "critical"
        }))
        .unwrap();

        let spec = TableSpec::from_settings("patient", settings);
        assert_eq!(spec.primary_incremental_column(), Some("DateModified"));
        assert_eq!(spec.importance_tier, ImportanceTier::Critical);
        assert_eq!(spec.batch_size, None);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn tiers_order_from_most_important() {
        let mut tiers = vec![
            ImportanceTier::Low,
            ImportanceTier::Critical,
            ImportanceTier::Normal,
            ImportanceTier::High,
        ];
        tiers.sort();
        assert_eq!(
            tiers,
            vec![
                ImportanceTier::Critical,
                ImportanceTier::High,
                ImportanceTier::Normal,
                ImportanceTier::Low
            ]
        );
    }

    #[test]
    fn incremental_without_columns_is_rejected() {
        let spec = TableSpec::incremental("orders", Vec::<String>::new());
        assert_eq!(
            spec.validate(),
            Err(ValidationError::IncrementalColumnsMissing {
                table: "orders".to_string()
            })
        );
    }
}

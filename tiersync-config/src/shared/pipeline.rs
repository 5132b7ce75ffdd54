use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Run-level settings of the replication-and-load pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Number of tables processed at the same time.
    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: u16,
    #[serde(default = "default_extract_timeout_ms")]
    pub extract_timeout_ms: u64,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// Hard upper bound applied to every stage timeout.
    #[serde(default = "default_stage_timeout_ceiling_ms")]
    pub stage_timeout_ceiling_ms: u64,
    /// An incremental table not successfully copied for longer than this is fully refreshed.
    #[serde(default = "default_max_incremental_gap_secs")]
    pub max_incremental_gap_secs: u64,
    /// Share of the source rows pending for an incremental copy above which a table with poor
    /// throughput is escalated to a full refresh.
    #[serde(default = "default_escalation_backlog_ratio")]
    pub escalation_backlog_ratio: f64,
    /// Observed throughput below this share of the expected throughput counts as poor.
    #[serde(default = "default_poor_throughput_ratio")]
    pub poor_throughput_ratio: f64,
    /// Schema of the warehouse receiving the converted tables.
    #[serde(default = "default_warehouse_schema")]
    pub warehouse_schema: String,
    /// Treats every table as `full` for this run.
    #[serde(default)]
    pub force_full_refresh: bool,
}

impl PipelineConfig {
    pub const DEFAULT_MAX_PARALLEL_TABLES: u16 = 4;

    pub const DEFAULT_EXTRACT_TIMEOUT_MS: u64 = 30 * 60 * 1_000;

    pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 30 * 60 * 1_000;

    pub const DEFAULT_STAGE_TIMEOUT_CEILING_MS: u64 = 2 * 60 * 60 * 1_000;

    pub const DEFAULT_MAX_INCREMENTAL_GAP_SECS: u64 = 7 * 24 * 60 * 60;

    pub const DEFAULT_ESCALATION_BACKLOG_RATIO: f64 = 0.5;

    pub const DEFAULT_POOR_THROUGHPUT_RATIO: f64 = 0.25;

    pub const DEFAULT_WAREHOUSE_SCHEMA: &'static str = "public";

    /// Extraction timeout, clamped to the hard ceiling.
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.extract_timeout_ms.min(self.stage_timeout_ceiling_ms))
    }

    /// Hard ceiling of every stage.
    pub fn stage_timeout_ceiling(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ceiling_ms)
    }

    /// Load timeout, clamped to the hard ceiling.
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms.min(self.stage_timeout_ceiling_ms))
    }

    pub fn max_incremental_gap(&self) -> Duration {
        Duration::from_secs(self.max_incremental_gap_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_parallel_tables == 0 {
            return Err(ValidationError::MaxParallelTablesZero);
        }

        let stages = [
            ("extract", self.extract_timeout_ms),
            ("load", self.load_timeout_ms),
        ];
        for (stage, timeout_ms) in stages {
            if timeout_ms > self.stage_timeout_ceiling_ms {
                return Err(ValidationError::TimeoutExceedsCeiling {
                    stage,
                    timeout_ms,
                    ceiling_ms: self.stage_timeout_ceiling_ms,
                });
            }
        }

        let ratios = [
            ("pipeline.escalation_backlog_ratio", self.escalation_backlog_ratio),
            ("pipeline.poor_throughput_ratio", self.poor_throughput_ratio),
        ];
        for (field, value) in ratios {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ValidationError::InvalidRatio { field, value });
            }
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tables: default_max_parallel_tables(),
            extract_timeout_ms: default_extract_timeout_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            stage_timeout_ceiling_ms: default_stage_timeout_ceiling_ms(),
            max_incremental_gap_secs: default_max_incremental_gap_secs(),
            escalation_backlog_ratio: default_escalation_backlog_ratio(),
            poor_throughput_ratio: default_poor_throughput_ratio(),
            warehouse_schema: default_warehouse_schema(),
            force_full_refresh: false,
        }
    }
}

fn default_max_parallel_tables() -> u16 {
    PipelineConfig::DEFAULT_MAX_PARALLEL_TABLES
}

fn default_extract_timeout_ms() -> u64 {
    PipelineConfig::DEFAULT_EXTRACT_TIMEOUT_MS
}

fn default_load_timeout_ms() -> u64 {
    PipelineConfig::DEFAULT_LOAD_TIMEOUT_MS
}

fn default_stage_timeout_ceiling_ms() -> u64 {
    PipelineConfig::DEFAULT_STAGE_TIMEOUT_CEILING_MS
}

fn default_max_incremental_gap_secs() -> u64 {
    PipelineConfig::DEFAULT_MAX_INCREMENTAL_GAP_SECS
}

fn default_escalation_backlog_ratio() -> f64 {
    PipelineConfig::DEFAULT_ESCALATION_BACKLOG_RATIO
}

fn default_poor_throughput_ratio() -> f64 {
    PipelineConfig::DEFAULT_POOR_THROUGHPUT_RATIO
}

fn default_warehouse_schema() -> String {
    PipelineConfig::DEFAULT_WAREHOUSE_SCHEMA.to_string()
}

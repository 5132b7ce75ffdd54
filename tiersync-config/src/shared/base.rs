use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("`pipeline.max_parallel_tables` cannot be zero")]
    MaxParallelTablesZero,
    #[error("`{role}.pool_size` cannot be zero")]
    PoolSizeZero { role: &'static str },
    #[error("batch size for `{category}` tables cannot be zero")]
    BatchSizeZero { category: &'static str },
    #[error("retry tier `{tier}` must allow at least one attempt")]
    RetryMaxAttemptsZero { tier: &'static str },
    #[error("retry tier `{tier}` has `base_delay_ms` greater than `max_delay_ms`")]
    RetryDelayInverted { tier: &'static str },
    #[error("{stage} timeout of {timeout_ms}ms exceeds the hard ceiling of {ceiling_ms}ms")]
    TimeoutExceedsCeiling {
        stage: &'static str,
        timeout_ms: u64,
        ceiling_ms: u64,
    },
    #[error("`{field}` must be within (0, 1], got {value}")]
    InvalidRatio { field: &'static str, value: f64 },
    #[error("table `{table}` uses the incremental strategy but lists no incremental columns")]
    IncrementalColumnsMissing { table: String },
    #[error("table `{table}` has a zero batch size")]
    TableBatchSizeZero { table: String },
    #[error("load thresholds must be increasing: {detail}")]
    LoadThresholdsUnordered { detail: String },
    #[error("`load.parallel_workers` cannot be zero")]
    ParallelWorkersZero,
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Thresholds and knobs of the replica to warehouse load.
///
/// Strategy selection walks the thresholds in order: tables up to `standard_max_rows` rows and
/// below `standard_max_size_mb` are loaded in one pass, up to `chunked_max_rows` in fixed-size
/// chunks, up to `streaming_max_rows` through a streaming cursor and anything larger through a
/// staged bulk file or parallel range workers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoadConfig {
    #[serde(default = "default_standard_max_rows")]
    pub standard_max_rows: u64,
    #[serde(default = "default_standard_max_size_mb")]
    pub standard_max_size_mb: f64,
    #[serde(default = "default_chunked_max_rows")]
    pub chunked_max_rows: u64,
    #[serde(default = "default_streaming_max_rows")]
    pub streaming_max_rows: u64,
    /// Very large tables at or above this size always go through a staged bulk file.
    #[serde(default = "default_bulk_file_min_size_mb")]
    pub bulk_file_min_size_mb: f64,
    /// Rows read from the replica per page by the paging strategies.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of range workers of the parallel strategy, each with its own connections.
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    /// Directory receiving staged bulk files. Defaults to the system temporary directory.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl LoadConfig {
    pub const DEFAULT_STANDARD_MAX_ROWS: u64 = 10_000;

    pub const DEFAULT_STANDARD_MAX_SIZE_MB: f64 = 10.0;

    pub const DEFAULT_CHUNKED_MAX_ROWS: u64 = 500_000;

    pub const DEFAULT_STREAMING_MAX_ROWS: u64 = 5_000_000;

    pub const DEFAULT_BULK_FILE_MIN_SIZE_MB: f64 = 2_048.0;

    pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

    pub const DEFAULT_PARALLEL_WORKERS: usize = 4;

    /// Returns the staging directory, falling back to the system temporary directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.chunk_size == 0 {
            return Err(ValidationError::BatchSizeZero { category: "load" });
        }

        if self.parallel_workers == 0 {
            return Err(ValidationError::ParallelWorkersZero);
        }

        if self.standard_max_rows >= self.chunked_max_rows {
            return Err(ValidationError::LoadThresholdsUnordered {
                detail: format!(
                    "standard_max_rows ({}) must be below chunked_max_rows ({})",
                    self.standard_max_rows, self.chunked_max_rows
                ),
            });
        }

        if self.chunked_max_rows >= self.streaming_max_rows {
            return Err(ValidationError::LoadThresholdsUnordered {
                detail: format!(
                    "chunked_max_rows ({}) must be below streaming_max_rows ({})",
                    self.chunked_max_rows, self.streaming_max_rows
                ),
            });
        }

        Ok(())
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            standard_max_rows: default_standard_max_rows(),
            standard_max_size_mb: default_standard_max_size_mb(),
            chunked_max_rows: default_chunked_max_rows(),
            streaming_max_rows: default_streaming_max_rows(),
            bulk_file_min_size_mb: default_bulk_file_min_size_mb(),
            chunk_size: default_chunk_size(),
            parallel_workers: default_parallel_workers(),
            staging_dir: None,
        }
    }
}

fn default_standard_max_rows() -> u64 {
    LoadConfig::DEFAULT_STANDARD_MAX_ROWS
}

fn default_standard_max_size_mb() -> f64 {
    LoadConfig::DEFAULT_STANDARD_MAX_SIZE_MB
}

fn default_chunked_max_rows() -> u64 {
    LoadConfig::DEFAULT_CHUNKED_MAX_ROWS
}

fn default_streaming_max_rows() -> u64 {
    LoadConfig::DEFAULT_STREAMING_MAX_ROWS
}

fn default_bulk_file_min_size_mb() -> f64 {
    LoadConfig::DEFAULT_BULK_FILE_MIN_SIZE_MB
}

fn default_chunk_size() -> usize {
    LoadConfig::DEFAULT_CHUNK_SIZE
}

fn default_parallel_workers() -> usize {
    LoadConfig::DEFAULT_PARALLEL_WORKERS
}

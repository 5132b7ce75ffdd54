use std::fmt;

use serde::Serialize;
use tiersync_config::shared::LoadConfig;

/// How rows are moved from the replica into the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Reads the whole window at once and upserts it.
    Standard,
    /// Pages through the window in fixed-size chunks.
    Chunked,
    /// Streams the window from one cursor and upserts it in batches.
    Streaming,
    /// Splits the window into disjoint key ranges loaded by concurrent workers.
    Parallel,
    /// Stages the window as a CSV file and bulk loads it server side.
    BulkFile,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Standard => "standard",
            LoadStrategy::Chunked => "chunked",
            LoadStrategy::Streaming => "streaming",
            LoadStrategy::Parallel => "parallel",
            LoadStrategy::BulkFile => "bulk_file",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size of the rows about to be loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadEstimate {
    pub rows: u64,
    pub size_mb: f64,
    /// The table has an integer key the window can be partitioned on.
    pub partitionable: bool,
}

impl LoadEstimate {
    /// Estimates a window of `window_rows` rows out of `total_rows`, scaling the table's
    /// estimated size proportionally.
    pub fn for_window(
        window_rows: u64,
        total_rows: u64,
        table_size_mb: f64,
        partitionable: bool,
    ) -> Self {
        let size_mb = if total_rows == 0 || window_rows >= total_rows {
            table_size_mb
        } else {
            table_size_mb * window_rows as f64 / total_rows as f64
        };

        Self {
            rows: window_rows,
            size_mb,
            partitionable,
        }
    }
}

/// Selects the load strategy of a window.
pub fn select_strategy(estimate: LoadEstimate, config: &LoadConfig) -> LoadStrategy {
    if estimate.rows <= config.standard_max_rows && estimate.size_mb < config.standard_max_size_mb
    {
        LoadStrategy::Standard
    } else if estimate.rows <= config.chunked_max_rows {
        LoadStrategy::Chunked
    } else if estimate.rows <= config.streaming_max_rows {
        LoadStrategy::Streaming
    } else if estimate.size_mb >= config.bulk_file_min_size_mb || !estimate.partitionable {
        LoadStrategy::BulkFile
    } else {
        LoadStrategy::Parallel
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bail;
use crate::error::{ErrorKind, SyncError};

/// Status of the last load of a table from the replica into the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Success,
    Failed,
    InProgress,
}

impl LoadStatus {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            LoadStatus::Success => "success",
            LoadStatus::Failed => "failed",
            LoadStatus::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

impl TryFrom<&str> for LoadStatus {
    type Error = SyncError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "success" => Ok(LoadStatus::Success),
            "failed" => Ok(LoadStatus::Failed),
            "in_progress" => Ok(LoadStatus::InProgress),
            other => bail!(
                ErrorKind::InvalidState,
                "Unknown load status in load_progress",
                other.to_string()
            ),
        }
    }
}

/// One row of the `load_progress` table.
///
/// `created_at` and `updated_at` are maintained by the warehouse and are `None` on records that
/// have not been read back from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub table_name: String,
    pub rows_loaded: u64,
    pub status: LoadStatus,
    pub load_strategy: Option<String>,
    pub last_loaded_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LoadProgress {
    pub fn new(table_name: impl Into<String>, status: LoadStatus) -> Self {
        Self {
            table_name: table_name.into(),
            rows_loaded: 0,
            status,
            load_strategy: None,
            last_loaded_at: None,
            created_at: None,
            updated_at: None,
        }
    }
}

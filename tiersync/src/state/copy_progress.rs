use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bail;
use crate::error::{ErrorKind, SyncError};

/// Status of the last copy of a table from the source into the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Success,
    Failed,
    InProgress,
}

impl CopyStatus {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            CopyStatus::Success => "success",
            CopyStatus::Failed => "failed",
            CopyStatus::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

impl TryFrom<&str> for CopyStatus {
    type Error = SyncError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "success" => Ok(CopyStatus::Success),
            "failed" => Ok(CopyStatus::Failed),
            "in_progress" => Ok(CopyStatus::InProgress),
            other => bail!(
                ErrorKind::InvalidState,
                "Unknown copy status in copy_progress",
                other.to_string()
            ),
        }
    }
}

/// Position reached by an incremental copy: a value of the primary incremental column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Watermark {
    pub column: String,
    /// Value rendered as text.
    pub value: String,
}

/// One row of the `copy_progress` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyProgress {
    pub table_name: String,
    pub rows_copied: u64,
    pub status: CopyStatus,
    pub last_primary_value: Option<String>,
    pub primary_column_name: Option<String>,
    pub copy_duration_ms: u64,
    /// End of the last copy that finished with [`CopyStatus::Success`].
    pub last_success_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CopyProgress {
    /// Returns the persisted watermark, when both the value and its column are known.
    pub fn watermark(&self) -> Option<Watermark> {
        match (&self.primary_column_name, &self.last_primary_value) {
            (Some(column), Some(value)) => Some(Watermark {
                column: column.clone(),
                value: value.clone(),
            }),
            _ => None,
        }
    }

    /// Rows per second of the last successful copy, when it copied anything measurable.
    pub fn observed_throughput(&self) -> Option<f64> {
        if self.status != CopyStatus::Success || self.rows_copied == 0 || self.copy_duration_ms == 0
        {
            return None;
        }

        Some(self.rows_copied as f64 / (self.copy_duration_ms as f64 / 1000.0))
    }

    /// Time elapsed since the last successful copy, measured at `now`.
    pub fn time_since_success(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_success_at
            .map(|at| (now - at).to_std().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(status: CopyStatus, rows: u64, duration_ms: u64) -> CopyProgress {
        CopyProgress {
            table_name: "patient".to_string(),
            rows_copied: rows,
            status,
            last_primary_value: Some("2024-01-01 00:00:00".to_string()),
            primary_column_name: Some("DateModified".to_string()),
            copy_duration_ms: duration_ms,
            last_success_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn statuses_parse_from_their_stored_names() {
        for status in [CopyStatus::Success, CopyStatus::Failed, CopyStatus::InProgress] {
            assert_eq!(CopyStatus::try_from(status.as_static_str()).unwrap(), status);
        }
        assert!(CopyStatus::try_from("done").is_err());
    }

    #[test]
    fn throughput_is_measured_on_successful_copies_only() {
        assert_eq!(
            progress(CopyStatus::Success, 5_000, 2_000).observed_throughput(),
            Some(2_500.0)
        );
        assert_eq!(progress(CopyStatus::Failed, 5_000, 2_000).observed_throughput(), None);
        assert_eq!(progress(CopyStatus::Success, 0, 2_000).observed_throughput(), None);
    }

    #[test]
    fn watermark_needs_value_and_column() {
        let mut record = progress(CopyStatus::Success, 3, 10);
        assert_eq!(record.watermark().unwrap().column, "DateModified");
        record.primary_column_name = None;
        assert_eq!(record.watermark(), None);
    }
}

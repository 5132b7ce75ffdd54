//! Per-table results and the aggregated report of a run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tiersync_config::shared::ExtractionStrategy;

use crate::error::{ErrorKind, SyncError};
use crate::extract::FullRefreshReason;
use crate::load::LoadStrategy;

/// Lifecycle of one table within a run.
///
/// A table moves `Pending -> Extracting -> Loading -> Done`, or to `Failed` from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePhase {
    Pending,
    Extracting,
    Loading,
    Done,
    Failed,
}

impl TablePhase {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            TablePhase::Pending => "pending",
            TablePhase::Extracting => "extracting",
            TablePhase::Loading => "loading",
            TablePhase::Done => "done",
            TablePhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TablePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// Failure of a table, as rendered in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    /// Phase the table was in when it failed.
    pub phase: TablePhase,
    pub kind: String,
    pub message: String,
}

impl TableFailure {
    pub fn new(phase: TablePhase, err: &SyncError) -> Self {
        Self {
            phase,
            kind: format!("{:?}", err.kind()),
            message: err.summary(),
        }
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == format!("{kind:?}")
    }
}

/// Outcome of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRunResult {
    pub table_name: String,
    pub success: bool,
    /// Last phase reached: [`TablePhase::Done`] on success.
    pub phase: TablePhase,
    pub rows_extracted: u64,
    pub rows_loaded: u64,
    pub duration_ms: u64,
    pub extraction_strategy: Option<ExtractionStrategy>,
    /// Set when an incremental table was copied in full.
    pub full_refresh_reason: Option<FullRefreshReason>,
    pub load_strategy: Option<LoadStrategy>,
    /// The warehouse was found behind the replica and fully reloaded.
    pub stale_state_recovered: bool,
    /// Verification counts disagreed after the load.
    pub verification_mismatch: bool,
    pub error: Option<TableFailure>,
}

impl TableRunResult {
    pub fn pending(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            success: false,
            phase: TablePhase::Pending,
            rows_extracted: 0,
            rows_loaded: 0,
            duration_ms: 0,
            extraction_strategy: None,
            full_refresh_reason: None,
            load_strategy: None,
            stale_state_recovered: false,
            verification_mismatch: false,
            error: None,
        }
    }

    /// Builds the result of a table that never started, e.g. because the run was cancelled.
    pub fn not_started(table_name: impl Into<String>, err: &SyncError) -> Self {
        let mut result = Self::pending(table_name);
        result.error = Some(TableFailure::new(TablePhase::Pending, err));
        result
    }

    pub fn fail(&mut self, err: &SyncError) {
        self.success = false;
        self.error = Some(TableFailure::new(self.phase, err));
        self.phase = TablePhase::Failed;
    }
}

/// Aggregated outcome of a run, keyed by table name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tables: BTreeMap<String, TableRunResult>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            tables: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, result: TableRunResult) {
        self.tables.insert(result.table_name.clone(), result);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
    }

    pub fn get(&self, table_name: &str) -> Option<&TableRunResult> {
        self.tables.get(table_name)
    }

    pub fn successes(&self) -> impl Iterator<Item = &TableRunResult> {
        self.tables.values().filter(|result| result.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableRunResult> {
        self.tables.values().filter(|result| !result.success)
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn total_rows_extracted(&self) -> u64 {
        self.tables.values().map(|result| result.rows_extracted).sum()
    }

    pub fn total_rows_loaded(&self) -> u64 {
        self.tables.values().map(|result| result.rows_loaded).sum()
    }

    /// Share of loaded tables that needed a stale-state recovery.
    pub fn stale_recovery_rate(&self) -> f64 {
        let loaded = self
            .tables
            .values()
            .filter(|result| result.load_strategy.is_some())
            .count();
        if loaded == 0 {
            return 0.0;
        }

        let recovered = self
            .tables
            .values()
            .filter(|result| result.stale_state_recovered)
            .count();

        recovered as f64 / loaded as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_error;

    fn loaded(name: &str, recovered: bool) -> TableRunResult {
        let mut result = TableRunResult::pending(name);
        result.success = true;
        result.phase = TablePhase::Done;
        result.rows_extracted = 3;
        result.rows_loaded = 3;
        result.load_strategy = Some(LoadStrategy::Standard);
        result.stale_state_recovered = recovered;
        result
    }

    #[test]
    fn failure_keeps_the_phase_it_happened_in() {
        let mut result = TableRunResult::pending("orders");
        result.phase = TablePhase::Loading;
        result.fail(&sync_error!(ErrorKind::SchemaIncompatibility, "Incompatible table"));

        assert_eq!(result.phase, TablePhase::Failed);
        let failure = result.error.unwrap();
        assert_eq!(failure.phase, TablePhase::Loading);
        assert!(failure.is_kind(ErrorKind::SchemaIncompatibility));
    }

    #[test]
    fn report_aggregates_tables() {
        let mut report = RunReport::new(Utc::now());
        report.record(loaded("a", false));
        report.record(loaded("b", true));
        report.record(TableRunResult::not_started(
            "c",
            &sync_error!(ErrorKind::Cancelled, "Run cancelled"),
        ));

        assert_eq!(report.successes().count(), 2);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.is_success());
        assert_eq!(report.total_rows_loaded(), 6);
        assert_eq!(report.stale_recovery_rate(), 0.5);
    }

    #[test]
    fn report_serializes_by_table_name() {
        let mut report = RunReport::new(Utc::now());
        report.record(loaded("patient", false));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["tables"]["patient"]["rows_loaded"], 3);
        assert_eq!(value["tables"]["patient"]["load_strategy"], "standard");
        assert_eq!(value["tables"]["patient"]["phase"], "done");
    }
}

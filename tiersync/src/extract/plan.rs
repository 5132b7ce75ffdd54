use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tiersync_config::shared::{PipelineConfig, TableSpec};

use crate::profile::PerformanceProfile;
use crate::state::{CopyProgress, CopyStatus, Watermark};

/// Why an incremental table is copied in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FullRefreshReason {
    /// No copy progress exists for the table.
    FirstRun,
    /// The run was started with a forced full refresh.
    Forced,
    /// The configured primary incremental column differs from the persisted one.
    ColumnChanged,
    /// The last successful copy is older than the allowed incremental gap.
    GapExceeded,
    /// The backlog is large and the table historically copies slowly.
    PoorThroughput,
    /// Progress exists but carries no watermark.
    MissingWatermark,
}

impl FullRefreshReason {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            FullRefreshReason::FirstRun => "first_run",
            FullRefreshReason::Forced => "forced",
            FullRefreshReason::ColumnChanged => "column_changed",
            FullRefreshReason::GapExceeded => "gap_exceeded",
            FullRefreshReason::PoorThroughput => "poor_throughput",
            FullRefreshReason::MissingWatermark => "missing_watermark",
        }
    }
}

impl fmt::Display for FullRefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// How one table is copied in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPlan {
    /// Recreate the replica table and copy every row. `reason` is set for incremental tables.
    Full { reason: Option<FullRefreshReason> },
    /// Copy the rows after `watermark`, including the boundary value when `inclusive`.
    Incremental { watermark: Watermark, inclusive: bool },
}

impl CopyPlan {
    pub fn is_full(&self) -> bool {
        matches!(self, CopyPlan::Full { .. })
    }

    pub fn full_refresh_reason(&self) -> Option<FullRefreshReason> {
        match self {
            CopyPlan::Full { reason } => *reason,
            CopyPlan::Incremental { .. } => None,
        }
    }
}

/// Plans the copy of `spec` from its persisted progress.
///
/// Backlog-based escalation needs row counts and is decided separately by [`should_escalate`].
pub fn plan_copy(
    spec: &TableSpec,
    prior: Option<&CopyProgress>,
    pipeline: &PipelineConfig,
    now: DateTime<Utc>,
) -> CopyPlan {
    let full = |reason| CopyPlan::Full {
        reason: Some(reason),
    };

    let Some(column) = spec.primary_incremental_column() else {
        return CopyPlan::Full { reason: None };
    };
    if !spec.is_incremental() {
        return CopyPlan::Full { reason: None };
    }

    if pipeline.force_full_refresh {
        return full(FullRefreshReason::Forced);
    }

    let Some(prior) = prior else {
        return full(FullRefreshReason::FirstRun);
    };

    let Some(watermark) = prior.watermark() else {
        return full(FullRefreshReason::MissingWatermark);
    };

    if watermark.column != column {
        return full(FullRefreshReason::ColumnChanged);
    }

    let gap_exceeded = prior
        .time_since_success(now)
        .is_some_and(|elapsed| elapsed > pipeline.max_incremental_gap());
    if gap_exceeded {
        return full(FullRefreshReason::GapExceeded);
    }

    CopyPlan::Incremental {
        watermark,
        inclusive: prior.status != CopyStatus::Success,
    }
}

/// Returns `true` when a slow table has fallen so far behind that a full copy is preferable.
pub fn should_escalate(
    profile: &PerformanceProfile,
    pending_rows: u64,
    total_rows: u64,
    pipeline: &PipelineConfig,
) -> bool {
    profile.is_poor(pipeline.poor_throughput_ratio)
        && total_rows > 0
        && pending_rows as f64 > pipeline.escalation_backlog_ratio * total_rows as f64
}

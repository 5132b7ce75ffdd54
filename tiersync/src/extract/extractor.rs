use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tiersync_config::shared::{ExtractionStrategy, PipelineConfig, TableSpec};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::config::BatchConfig;
use crate::conversions::watermark::parse_watermark;
use crate::database::{Connector, KeysetPager, PrepareMode, ReplicaStore, RowFilter, RowSource};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::extract::plan::{CopyPlan, FullRefreshReason, plan_copy, should_escalate};
use crate::metrics::{
    STRATEGY_LABEL, TABLE_NAME_LABEL, TIERSYNC_BYTES_EXTRACTED_TOTAL,
    TIERSYNC_EXTRACT_DURATION_SECONDS, TIERSYNC_FULL_REFRESH_ESCALATIONS_TOTAL,
    TIERSYNC_ROWS_EXTRACTED_TOTAL, TIERSYNC_ROWS_SKIPPED_TOTAL,
};
use crate::profile::PerformanceProfile;
use crate::resilience::ResilientSession;
use crate::state::{CopyProgress, CopyStatus};
use crate::sync_error;
use crate::types::{Cell, SizeHint, TableRow, TableSchema};

/// Result of copying one table into the replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOutcome {
    /// Strategy actually used, which is `Full` for an escalated incremental table.
    pub strategy: ExtractionStrategy,
    pub full_refresh_reason: Option<FullRefreshReason>,
    pub rows_extracted: u64,
    /// Source rows the replica rejected.
    pub rows_skipped: u64,
    pub profile: PerformanceProfile,
    /// Schema of the table, identical on the source and the replica.
    pub schema: TableSchema,
    pub duration: Duration,
}

impl ExtractOutcome {
    pub fn is_full(&self) -> bool {
        self.strategy == ExtractionStrategy::Full
    }
}

/// Position reached by a running copy.
#[derive(Debug, Default)]
struct CopyCursor {
    rows: u64,
    skipped: u64,
    /// Largest value of the primary incremental column copied so far.
    high_water: Option<Cell>,
}

impl CopyCursor {
    /// Writes the position reached into `progress`.
    fn checkpoint(&self, progress: &mut CopyProgress) {
        progress.rows_copied = self.rows;
        if let Some(value) = self.high_water.as_ref().and_then(Cell::to_text) {
            progress.last_primary_value = Some(value);
        }
        progress.updated_at = Utc::now();
    }

    fn track(&mut self, page: &[TableRow], position: Option<usize>) {
        let Some(position) = position else {
            return;
        };

        for value in page.iter().filter_map(|row| row.values.get(position)) {
            if value.is_null() {
                continue;
            }
            let higher = self
                .high_water
                .as_ref()
                .is_none_or(|current| value.compare(current).is_gt());
            if higher {
                self.high_water = Some(value.clone());
            }
        }
    }
}

/// Copies tables from the source into the replica.
///
/// Rows are read in keyset pages ordered by the incremental columns followed by the primary key
/// (or by the primary key alone for full tables) and upserted into the replica page by page.
/// The copy progress record is written before the first page and after every committed page,
/// so a copy interrupted at any point resumes from its last page.
///
/// With a deadline, the copy stops with [`ErrorKind::Timeout`] at the first page boundary past
/// it and records the rows copied so far.
pub struct Extractor<'a, S, R>
where
    S: Connector,
    R: Connector,
{
    source: &'a mut ResilientSession<S>,
    replica: &'a mut ResilientSession<R>,
    pipeline: &'a PipelineConfig,
    batch: &'a BatchConfig,
    shutdown_rx: ShutdownRx,
    deadline: Option<Instant>,
}

impl<'a, S, R> Extractor<'a, S, R>
where
    S: Connector,
    S::Connection: RowSource,
    R: Connector,
    R::Connection: ReplicaStore,
{
    pub fn new(
        source: &'a mut ResilientSession<S>,
        replica: &'a mut ResilientSession<R>,
        pipeline: &'a PipelineConfig,
        batch: &'a BatchConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            source,
            replica,
            pipeline,
            batch,
            shutdown_rx,
            deadline: None,
        }
    }

    /// Stops the copy at the first page boundary after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub async fn extract(&mut self, spec: &TableSpec) -> SyncResult<ExtractOutcome> {
        let started = Instant::now();
        let schema = self.source.table_schema(&spec.name).await?;
        let prior = self.replica.load_copy_progress(&spec.name).await?;
        let profile = PerformanceProfile::derive(spec, self.batch, prior.as_ref());

        let mut plan = plan_copy(spec, prior.as_ref(), self.pipeline, Utc::now());
        if let CopyPlan::Incremental {
            watermark,
            inclusive,
        } = &plan
        {
            if profile.is_poor(self.pipeline.poor_throughput_ratio) {
                let filter =
                    watermark_filter(&schema, &watermark.column, &watermark.value, *inclusive)?;
                let pending = self.source.count_rows(&spec.name, &filter).await?;
                let total = self.source.count_rows(&spec.name, &RowFilter::all()).await?;

                if should_escalate(&profile, pending, total, self.pipeline) {
                    warn!(
                        table = %spec.name,
                        pending,
                        total,
                        "slow table fell behind, escalating to a full refresh"
                    );
                    plan = CopyPlan::Full {
                        reason: Some(FullRefreshReason::PoorThroughput),
                    };
                }
            }
        }

        if let Some(reason) = plan.full_refresh_reason() {
            info!(table = %spec.name, %reason, "copying incremental table in full");
            counter!(
                TIERSYNC_FULL_REFRESH_ESCALATIONS_TOTAL,
                TABLE_NAME_LABEL => spec.name.clone(),
                "reason" => reason.as_static_str(),
            )
            .increment(1);
        }

        let strategy = if plan.is_full() {
            ExtractionStrategy::Full
        } else {
            ExtractionStrategy::Incremental
        };

        info!(
            table = %spec.name,
            %strategy,
            category = %profile.category,
            batch_size = profile.batch_size,
            "starting extraction"
        );

        let mode = if plan.is_full() {
            PrepareMode::Recreate
        } else {
            PrepareMode::KeepExisting
        };
        self.replica.prepare_replica_table(&schema, mode).await?;

        let primary_column = spec.primary_incremental_column().map(str::to_string);
        let mut progress = CopyProgress {
            table_name: spec.name.clone(),
            rows_copied: 0,
            status: CopyStatus::InProgress,
            last_primary_value: None,
            primary_column_name: primary_column.clone(),
            copy_duration_ms: 0,
            last_success_at: prior.as_ref().and_then(|prior| prior.last_success_at),
            updated_at: Utc::now(),
        };
        if let CopyPlan::Incremental { watermark, .. } = &plan {
            progress.last_primary_value = Some(watermark.value.clone());
        }
        self.replica.store_copy_progress(&progress).await?;

        let copied = self
            .copy_rows(spec, &schema, &plan, &profile, &mut progress)
            .await;
        progress.copy_duration_ms = started.elapsed().as_millis() as u64;

        let cursor = match copied {
            Ok(cursor) => cursor,
            Err((cursor, err)) => {
                // Pages are committed in order, so the high water mark is a valid resume point.
                cursor.checkpoint(&mut progress);
                progress.status = if err.kind() == ErrorKind::Cancelled {
                    CopyStatus::InProgress
                } else {
                    CopyStatus::Failed
                };

                if let Err(store_err) = self.replica.store_copy_progress(&progress).await {
                    warn!(
                        table = %spec.name,
                        error = %store_err.summary(),
                        "failed to record copy progress after a failed copy"
                    );
                }

                return Err(err);
            }
        };

        cursor.checkpoint(&mut progress);
        progress.status = CopyStatus::Success;
        progress.last_success_at = Some(progress.updated_at);
        if primary_column.is_none() {
            progress.last_primary_value = None;
        }
        self.replica.store_copy_progress(&progress).await?;

        let duration = started.elapsed();
        counter!(
            TIERSYNC_ROWS_EXTRACTED_TOTAL,
            TABLE_NAME_LABEL => spec.name.clone(),
            STRATEGY_LABEL => strategy.as_str(),
        )
        .increment(cursor.rows);
        histogram!(
            TIERSYNC_EXTRACT_DURATION_SECONDS,
            STRATEGY_LABEL => strategy.as_str(),
        )
        .record(duration.as_secs_f64());

        info!(
            table = %spec.name,
            %strategy,
            rows = cursor.rows,
            skipped = cursor.skipped,
            watermark = progress.last_primary_value.as_deref().unwrap_or(""),
            duration_ms = duration.as_millis() as u64,
            "extraction finished"
        );

        Ok(ExtractOutcome {
            strategy,
            full_refresh_reason: plan.full_refresh_reason(),
            rows_extracted: cursor.rows,
            rows_skipped: cursor.skipped,
            profile,
            schema,
            duration,
        })
    }

    /// Pages through the selected source rows and upserts them into the replica, recording
    /// `progress` after every page.
    ///
    /// On failure the cursor reached so far is returned with the error.
    async fn copy_rows(
        &mut self,
        spec: &TableSpec,
        schema: &TableSchema,
        plan: &CopyPlan,
        profile: &PerformanceProfile,
        progress: &mut CopyProgress,
    ) -> Result<CopyCursor, (CopyCursor, SyncError)> {
        let mut cursor = CopyCursor::default();

        let (filter, order_by) = match plan {
            CopyPlan::Incremental {
                watermark,
                inclusive,
            } => {
                let filter =
                    match watermark_filter(schema, &watermark.column, &watermark.value, *inclusive)
                    {
                        Ok(filter) => filter,
                        Err(err) => return Err((cursor, err)),
                    };
                (filter, schema.paging_order(&spec.incremental_columns))
            }
            CopyPlan::Full { .. } if spec.is_incremental() => {
                (RowFilter::all(), schema.paging_order(&spec.incremental_columns))
            }
            CopyPlan::Full { .. } => (
                RowFilter::all(),
                schema
                    .row_identity()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            ),
        };

        let tracked = spec
            .primary_incremental_column()
            .and_then(|column| schema.column_index(column));
        let mut pager = KeysetPager::new(schema, filter, order_by, profile.batch_size);

        while let Some(request) = pager.next_request() {
            if self.shutdown_rx.is_shutdown() {
                info!(table = %spec.name, rows = cursor.rows, "extraction stopped by shutdown");
                let err = sync_error!(
                    ErrorKind::Cancelled,
                    "Extraction cancelled",
                    format!("{} stopped after {} rows", spec.name, cursor.rows)
                );
                return Err((cursor, err));
            }

            if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!(table = %spec.name, rows = cursor.rows, "extraction reached its deadline");
                let err = sync_error!(
                    ErrorKind::Timeout,
                    "Stage timed out",
                    format!("extract of {} stopped after {} rows", spec.name, cursor.rows)
                );
                return Err((cursor, err));
            }

            let page = match self.source.read_page(schema, &request).await {
                Ok(page) => page,
                Err(err) => return Err((cursor, err)),
            };
            if page.is_empty() {
                break;
            }

            match self.write_page(schema, &page).await {
                Ok((written, skipped)) => {
                    cursor.rows += written;
                    cursor.skipped += skipped;
                }
                Err(err) => return Err((cursor, err)),
            }
            cursor.track(&page, tracked);
            pager.advance(&page);

            cursor.checkpoint(progress);
            if let Err(err) = self.replica.store_copy_progress(progress).await {
                return Err((cursor, err));
            }

            let page_bytes = page.size_hint();
            counter!(TIERSYNC_BYTES_EXTRACTED_TOTAL, TABLE_NAME_LABEL => spec.name.clone())
                .increment(page_bytes as u64);
            debug!(
                table = %spec.name,
                page_rows = page.len(),
                page_bytes,
                rows = cursor.rows,
                "copied page"
            );

            #[cfg(feature = "failpoints")]
            {
                if let Err(err) =
                    crate::failpoints::sync_fail_point(crate::failpoints::EXTRACT_AFTER_PAGE)
                {
                    return Err((cursor, err));
                }
            }
        }

        Ok(cursor)
    }

    /// Upserts a page, falling back to single rows when the replica rejects the batch.
    ///
    /// Returns the rows written and the rows skipped.
    async fn write_page(
        &mut self,
        schema: &TableSchema,
        page: &[TableRow],
    ) -> SyncResult<(u64, u64)> {
        let err = match self.replica.upsert_replica_rows(schema, page).await {
            Ok(written) => return Ok((written, 0)),
            Err(err) if is_row_rejection(&err) => err,
            Err(err) => return Err(err),
        };

        warn!(
            table = %schema.name,
            rows = page.len(),
            error = %err.summary(),
            "replica rejected a page, retrying row by row"
        );

        let mut written = 0;
        let mut skipped = 0;
        for row in page {
            match self
                .replica
                .upsert_replica_rows(schema, std::slice::from_ref(row))
                .await
            {
                Ok(count) => written += count,
                Err(err) if is_row_rejection(&err) => {
                    warn!(
                        table = %schema.name,
                        error = %err.summary(),
                        "skipping row rejected by the replica"
                    );
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if skipped > 0 {
            counter!(TIERSYNC_ROWS_SKIPPED_TOTAL, TABLE_NAME_LABEL => schema.name.clone())
                .increment(skipped);
        }

        Ok((written, skipped))
    }
}

/// Errors caused by the content of a row rather than by the connection or the table.
fn is_row_rejection(err: &SyncError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ReplicaQueryFailed | ErrorKind::InvalidData | ErrorKind::ConversionError
    )
}

/// Builds the filter selecting rows after a persisted watermark.
fn watermark_filter(
    schema: &TableSchema,
    column: &str,
    value: &str,
    inclusive: bool,
) -> SyncResult<RowFilter> {
    let Some(definition) = schema.column(column) else {
        return Err(sync_error!(
            ErrorKind::SourceSchemaError,
            "Incremental column not found",
            format!("{} has no column '{column}'", schema.name)
        ));
    };

    let value = parse_watermark(value, &definition.typ)?;
    Ok(RowFilter::after(column, value, inclusive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_tracks_the_largest_non_null_value() {
        let mut cursor = CopyCursor::default();
        let rows = [
            TableRow::new(vec![Cell::I64(1), Cell::I64(5)]),
            TableRow::new(vec![Cell::I64(2), Cell::Null]),
            TableRow::new(vec![Cell::I64(3), Cell::I64(3)]),
        ];

        cursor.track(&rows, Some(1));
        assert_eq!(cursor.high_water, Some(Cell::I64(5)));

        cursor.track(&rows[..1], None);
        assert_eq!(cursor.high_water, Some(Cell::I64(5)));
    }

    #[test]
    fn checkpoint_keeps_the_start_watermark_until_a_value_is_seen() {
        let mut progress = CopyProgress {
            table_name: "t".to_string(),
            rows_copied: 0,
            status: CopyStatus::InProgress,
            last_primary_value: Some("7".to_string()),
            primary_column_name: Some("Version".to_string()),
            copy_duration_ms: 0,
            last_success_at: None,
            updated_at: Utc::now(),
        };
        let mut cursor = CopyCursor {
            rows: 2,
            ..CopyCursor::default()
        };

        cursor.checkpoint(&mut progress);
        assert_eq!(progress.rows_copied, 2);
        assert_eq!(progress.last_primary_value.as_deref(), Some("7"));

        cursor.track(&[TableRow::new(vec![Cell::I64(9)])], Some(0));
        cursor.checkpoint(&mut progress);
        assert_eq!(progress.last_primary_value.as_deref(), Some("9"));
    }
}

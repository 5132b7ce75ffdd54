use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tiersync_config::shared::{LoadConfig, PipelineConfig, TableSpec};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::conversions::watermark::parse_watermark;
use crate::database::{Connector, RowFilter, RowSource, WarehouseStore};
use crate::error::{ErrorKind, SyncResult};
use crate::extract::ExtractOutcome;
use crate::load::bulk_file::BulkFileLoad;
use crate::load::method::{LoadJob, LoadMethod};
use crate::load::paged::{ChunkedLoad, StandardLoad};
use crate::load::parallel::{ParallelLoad, partition_column};
use crate::load::strategy::{LoadEstimate, LoadStrategy, select_strategy};
use crate::load::streaming::StreamingLoad;
use crate::load::verify::Verification;
use crate::metrics::{
    STRATEGY_LABEL, TABLE_NAME_LABEL, TIERSYNC_LOAD_DURATION_SECONDS,
    TIERSYNC_STALE_STATE_RECOVERIES_TOTAL, TIERSYNC_VERIFICATION_MISMATCHES_TOTAL,
};
use crate::resilience::ResilientSession;
use crate::schema::{EnsuredTable, RowConverter, derive_schema, ensure_table};
use crate::state::{LoadProgress, LoadStatus};
use crate::sync_error;
use crate::types::{TableSchema, TargetSchema};

/// Result of loading one table into the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub strategy: LoadStrategy,
    pub rows_loaded: u64,
    /// The warehouse was behind the replica and was reloaded in full.
    pub stale_state_recovered: bool,
    pub verification: Verification,
    pub target: TargetSchema,
    pub duration: Duration,
}

/// Rows of the replica selected for loading.
#[derive(Debug)]
struct LoadWindow {
    filter: RowFilter,
    rows: u64,
    stale_state_recovered: bool,
}

/// Loads replica tables into the warehouse.
///
/// Incremental tables only load the replica rows whose primary incremental column is above the
/// largest value already in the warehouse, paging in incremental column order so that an
/// interrupted load never leaves that maximum above a missing row. Before trusting a window,
/// the loader checks that the warehouse already holds every replica row below it and reloads
/// the table in full when it does not.
pub struct Loader<'a, R, W>
where
    R: Connector,
    W: Connector,
{
    replica: &'a mut ResilientSession<R>,
    warehouse: &'a mut ResilientSession<W>,
    pipeline: &'a PipelineConfig,
    config: &'a LoadConfig,
    shutdown_rx: ShutdownRx,
}

impl<'a, R, W> Loader<'a, R, W>
where
    R: Connector,
    R::Connection: RowSource,
    W: Connector,
    W::Connection: WarehouseStore,
{
    pub fn new(
        replica: &'a mut ResilientSession<R>,
        warehouse: &'a mut ResilientSession<W>,
        pipeline: &'a PipelineConfig,
        config: &'a LoadConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            replica,
            warehouse,
            pipeline,
            config,
            shutdown_rx,
        }
    }

    pub async fn load(
        &mut self,
        spec: &TableSpec,
        extracted: &ExtractOutcome,
    ) -> SyncResult<LoadOutcome> {
        let started = Instant::now();
        let schema = &extracted.schema;

        let derived = derive_schema(self.replica, schema, &self.pipeline.warehouse_schema).await?;
        let ensured = ensure_table(self.warehouse, derived).await?;

        #[cfg(feature = "failpoints")]
        crate::failpoints::sync_fail_point(crate::failpoints::LOAD_AFTER_ENSURE_TABLE)?;

        let mut progress = self
            .warehouse
            .load_load_progress(&spec.name)
            .await?
            .unwrap_or_else(|| LoadProgress::new(&spec.name, LoadStatus::InProgress));
        progress.status = LoadStatus::InProgress;
        self.warehouse.store_load_progress(&progress).await?;

        let outcome = match self.load_table(spec, extracted, &ensured, started).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Err(mark_err) = self.warehouse.mark_load_failed(&spec.name).await {
                    warn!(
                        table = %spec.name,
                        error = %mark_err.summary(),
                        "failed to record load progress after a failed load"
                    );
                }
                return Err(err);
            }
        };

        progress.status = LoadStatus::Success;
        progress.rows_loaded = outcome.rows_loaded;
        progress.load_strategy = Some(outcome.strategy.as_str().to_string());
        progress.last_loaded_at = Some(Utc::now());
        self.warehouse.store_load_progress(&progress).await?;

        Ok(outcome)
    }

    async fn load_table(
        &mut self,
        spec: &TableSpec,
        extracted: &ExtractOutcome,
        ensured: &EnsuredTable,
        started: Instant,
    ) -> SyncResult<LoadOutcome> {
        let schema = &extracted.schema;
        let target = &ensured.target;
        let replica_rows = self.replica.count_rows(&spec.name, &RowFilter::all()).await?;

        let window = self
            .select_window(spec, extracted, ensured, replica_rows)
            .await?;

        // Partitioned workers finish out of order, so only full windows are partitioned.
        let partitionable = window.filter.is_empty() && partition_column(schema).is_some();
        let estimate = LoadEstimate::for_window(
            window.rows,
            replica_rows,
            spec.estimated_size_mb,
            partitionable,
        );
        let strategy = select_strategy(estimate, self.config);
        info!(
            table = %target.full_name(),
            %strategy,
            window_rows = window.rows,
            replica_rows,
            "starting load"
        );

        let converter = RowConverter::new(schema, target);
        let order_by = if spec.is_incremental() {
            schema.paging_order(&spec.incremental_columns)
        } else {
            schema.paging_order(&[])
        };
        let mut job = LoadJob {
            replica: &mut *self.replica,
            warehouse: &mut *self.warehouse,
            schema,
            target,
            converter: &converter,
            window: &window.filter,
            order_by: &order_by,
            config: self.config,
            shutdown_rx: self.shutdown_rx.clone(),
        };
        let rows_loaded = match strategy {
            LoadStrategy::Standard => StandardLoad.load(&mut job).await?,
            LoadStrategy::Chunked => ChunkedLoad.load(&mut job).await?,
            LoadStrategy::Streaming => StreamingLoad.load(&mut job).await?,
            LoadStrategy::Parallel => ParallelLoad.load(&mut job).await?,
            LoadStrategy::BulkFile => BulkFileLoad.load(&mut job).await?,
        };

        let verification = Verification {
            window_rows: window.rows,
            rows_written: rows_loaded,
            replica_rows,
            warehouse_rows: self.warehouse.count_warehouse_rows(target).await?,
        };
        if !verification.is_consistent() {
            warn!(
                table = %target.full_name(),
                mismatches = %verification.mismatches().join("; "),
                "load verification found mismatching counts"
            );
            counter!(
                TIERSYNC_VERIFICATION_MISMATCHES_TOTAL,
                TABLE_NAME_LABEL => spec.name.clone(),
            )
            .increment(1);
        }

        let duration = started.elapsed();
        histogram!(
            TIERSYNC_LOAD_DURATION_SECONDS,
            STRATEGY_LABEL => strategy.as_str(),
        )
        .record(duration.as_secs_f64());

        info!(
            table = %target.full_name(),
            %strategy,
            rows_loaded,
            stale_state_recovered = window.stale_state_recovered,
            duration_ms = duration.as_millis() as u64,
            "load finished"
        );

        Ok(LoadOutcome {
            strategy,
            rows_loaded,
            stale_state_recovered: window.stale_state_recovered,
            verification,
            target: target.clone(),
            duration,
        })
    }

    /// Chooses the replica rows to load, truncating the warehouse table for full reloads.
    async fn select_window(
        &mut self,
        spec: &TableSpec,
        extracted: &ExtractOutcome,
        ensured: &EnsuredTable,
        replica_rows: u64,
    ) -> SyncResult<LoadWindow> {
        let target = &ensured.target;

        let incremental = if spec.is_incremental() && !extracted.is_full() && !ensured.created {
            self.incremental_filter(spec, &extracted.schema, target)
                .await?
        } else {
            None
        };

        let Some(filter) = incremental else {
            if !ensured.created {
                self.warehouse.truncate_warehouse_table(target).await?;
            }
            return Ok(LoadWindow {
                filter: RowFilter::all(),
                rows: replica_rows,
                stale_state_recovered: false,
            });
        };

        // The window is only trusted when the warehouse holds every replica row outside it.
        let rows = self.replica.count_rows(&spec.name, &filter).await?;
        let warehouse_rows = self.warehouse.count_warehouse_rows(target).await?;
        if !is_behind(replica_rows, rows, warehouse_rows) {
            return Ok(LoadWindow {
                filter,
                rows,
                stale_state_recovered: false,
            });
        }

        warn!(
            table = %target.full_name(),
            warehouse_rows,
            window_rows = rows,
            replica_rows,
            "warehouse is missing replica rows below its maximum, reloading in full"
        );
        counter!(
            TIERSYNC_STALE_STATE_RECOVERIES_TOTAL,
            TABLE_NAME_LABEL => spec.name.clone(),
        )
        .increment(1);

        self.warehouse.truncate_warehouse_table(target).await?;

        Ok(LoadWindow {
            filter: RowFilter::all(),
            rows: replica_rows,
            stale_state_recovered: true,
        })
    }

    /// Builds the filter selecting replica rows above the warehouse maximum, `None` when the
    /// warehouse holds no value to resume from.
    async fn incremental_filter(
        &mut self,
        spec: &TableSpec,
        schema: &TableSchema,
        target: &TargetSchema,
    ) -> SyncResult<Option<RowFilter>> {
        let Some(column) = spec.primary_incremental_column() else {
            return Ok(None);
        };
        let Some(definition) = schema.column(column) else {
            return Err(sync_error!(
                ErrorKind::SourceSchemaError,
                "Incremental column not found",
                format!("{} has no column '{column}'", schema.name)
            ));
        };

        let Some(max) = self.warehouse.max_warehouse_value(target, column).await? else {
            return Ok(None);
        };
        let value = parse_watermark(&max, &definition.typ)?;

        Ok(Some(RowFilter::after(column, value, false)))
    }
}

/// Returns `true` when the warehouse cannot hold every replica row outside the load window.
fn is_behind(replica_rows: u64, window_rows: u64, warehouse_rows: u64) -> bool {
    warehouse_rows.saturating_add(window_rows) < replica_rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_below_the_window_mark_the_warehouse_behind() {
        assert!(!is_behind(10, 0, 10));
        assert!(!is_behind(10, 2, 8));
        assert!(is_behind(10, 2, 7));
        assert!(is_behind(10, 0, 9));
    }

    #[test]
    fn extra_warehouse_rows_are_not_a_reason_to_reload() {
        assert!(!is_behind(10, 0, 12));
        assert!(!is_behind(0, 0, 0));
    }
}

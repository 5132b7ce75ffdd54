use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tiersync_config::shared::TableSpec;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::config::EngineConfig;
use crate::database::{Connector, ReplicaStore, RowSource, WarehouseStore};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::extract::Extractor;
use crate::load::Loader;
use crate::metrics::{
    OUTCOME_LABEL, TABLE_NAME_LABEL, TIERSYNC_TABLE_RUN_DURATION_SECONDS,
    TIERSYNC_TABLE_RUNS_TOTAL,
};
use crate::profile::SizeCategory;
use crate::report::{TablePhase, TableRunResult};
use crate::resilience::{ResilientSession, RetryPolicy};
use crate::sync_error;
use crate::workers::Tiers;

/// Runs the extract-then-load of one table and turns its outcome into a [`TableRunResult`].
///
/// Every stage is bounded by its timeout. Extraction stops cooperatively at its timeout and is
/// aborted outright at the stage ceiling. A failure at any stage is recorded in the result and
/// never propagated, so sibling tables are unaffected.
pub struct TableProcessor<S, R, W> {
    tiers: Tiers<S, R, W>,
    config: Arc<EngineConfig>,
    shutdown_rx: ShutdownRx,
}

impl<S: Clone, R: Clone, W: Clone> Clone for TableProcessor<S, R, W> {
    fn clone(&self) -> Self {
        Self {
            tiers: self.tiers.clone(),
            config: self.config.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
        }
    }
}

impl<S, R, W> TableProcessor<S, R, W>
where
    S: Connector,
    S::Connection: RowSource,
    R: Connector,
    R::Connection: RowSource + ReplicaStore,
    W: Connector,
    W::Connection: WarehouseStore,
{
    pub fn new(tiers: Tiers<S, R, W>, config: Arc<EngineConfig>, shutdown_rx: ShutdownRx) -> Self {
        Self {
            tiers,
            config,
            shutdown_rx,
        }
    }

    pub async fn process(&self, spec: &TableSpec) -> TableRunResult {
        let started = Instant::now();
        let mut result = TableRunResult::pending(&spec.name);

        let outcome = self.run_stages(spec, &mut result).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        let label = match &outcome {
            Ok(()) => {
                result.success = true;
                result.phase = TablePhase::Done;
                info!(
                    table = %spec.name,
                    rows_extracted = result.rows_extracted,
                    rows_loaded = result.rows_loaded,
                    duration_ms = result.duration_ms,
                    "table processed"
                );
                "success"
            }
            Err(err) => {
                error!(
                    table = %spec.name,
                    phase = %result.phase,
                    error = %err,
                    "table failed"
                );
                result.fail(err);
                if err.kind() == ErrorKind::Cancelled {
                    "cancelled"
                } else {
                    "failed"
                }
            }
        };

        counter!(
            TIERSYNC_TABLE_RUNS_TOTAL,
            TABLE_NAME_LABEL => spec.name.clone(),
            OUTCOME_LABEL => label,
        )
        .increment(1);
        histogram!(TIERSYNC_TABLE_RUN_DURATION_SECONDS, OUTCOME_LABEL => label)
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_stages(&self, spec: &TableSpec, result: &mut TableRunResult) -> SyncResult<()> {
        spec.validate()?;

        let config = &self.config;
        let category = SizeCategory::classify(spec.estimated_rows, spec.estimated_size_mb);
        let policy = RetryPolicy::for_category(&config.resilience, category);

        let mut source = ResilientSession::new(self.tiers.source.clone(), policy.clone());
        let mut replica = ResilientSession::new(self.tiers.replica.clone(), policy.clone());
        let mut warehouse = ResilientSession::new(self.tiers.warehouse.clone(), policy);

        result.phase = TablePhase::Extracting;
        let extract_deadline = Instant::now() + config.pipeline.extract_timeout();
        let extract_ceiling = config.pipeline.stage_timeout_ceiling();
        let extracted = {
            let mut extractor = Extractor::new(
                &mut source,
                &mut replica,
                &config.pipeline,
                &config.batch,
                self.shutdown_rx.clone(),
            )
            .with_deadline(extract_deadline);
            with_timeout("extract", extract_ceiling, spec, extractor.extract(spec)).await
        };
        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(err) => {
                // A copy aborted at the ceiling left its last page checkpoint in progress.
                if err.kind() == ErrorKind::Timeout {
                    mark_failed(&spec.name, replica.mark_copy_failed(&spec.name).await);
                }
                return Err(err);
            }
        };

        result.rows_extracted = extracted.rows_extracted;
        result.extraction_strategy = Some(extracted.strategy);
        result.full_refresh_reason = extracted.full_refresh_reason;

        result.phase = TablePhase::Loading;
        let load_timeout = config.pipeline.load_timeout();
        let loaded = {
            let mut loader = Loader::new(
                &mut replica,
                &mut warehouse,
                &config.pipeline,
                &config.load,
                self.shutdown_rx.clone(),
            );
            with_timeout("load", load_timeout, spec, loader.load(spec, &extracted)).await
        };
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                if err.kind() == ErrorKind::Timeout {
                    mark_failed(&spec.name, warehouse.mark_load_failed(&spec.name).await);
                }
                return Err(err);
            }
        };

        result.rows_loaded = loaded.rows_loaded;
        result.load_strategy = Some(loaded.strategy);
        result.stale_state_recovered = loaded.stale_state_recovered;
        result.verification_mismatch = !loaded.verification.is_consistent();

        Ok(())
    }
}

/// Runs one stage, failing it with [`ErrorKind::Timeout`] once `limit` has elapsed.
async fn with_timeout<T>(
    stage: &'static str,
    limit: Duration,
    spec: &TableSpec,
    future: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(sync_error!(
            ErrorKind::Timeout,
            "Stage timed out",
            format!(
                "{stage} of {} exceeded {} ms",
                spec.name,
                limit.as_millis()
            )
        )),
    }
}

/// Logs a failure to flag progress after a timed out stage.
fn mark_failed(table: &str, outcome: Result<(), SyncError>) {
    if let Err(err) = outcome {
        warn!(table, error = %err.summary(), "failed to flag progress after a timeout");
    }
}

use std::sync::Arc;

use chrono::Utc;
use tiersync_config::shared::TableSpec;
use tracing::{info, warn};

use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::config::EngineConfig;
use crate::database::{Connector, ReplicaStore, RowSource, WarehouseStore};
use crate::error::{ErrorKind, SyncResult};
use crate::report::{RunReport, TableRunResult};
use crate::sync_error;
use crate::workers::Tiers;
use crate::workers::pool::{ResultCollector, WorkerPool};
use crate::workers::table::TableProcessor;

/// Orders tables by importance tier, then by name.
pub fn prioritize(mut specs: Vec<TableSpec>) -> Vec<TableSpec> {
    specs.sort_by(|left, right| {
        left.importance_tier
            .cmp(&right.importance_tier)
            .then_with(|| left.name.cmp(&right.name))
    });
    specs
}

/// Runs a set of tables over a bounded worker pool, most important tables first.
///
/// A table only starts once every table of a more important tier has started. One table's
/// failure never stops the others: every table ends up in the [`RunReport`].
pub struct Orchestrator<S, R, W> {
    tiers: Tiers<S, R, W>,
    config: Arc<EngineConfig>,
    specs: Vec<TableSpec>,
    shutdown_tx: ShutdownTx,
}

impl<S, R, W> Orchestrator<S, R, W>
where
    S: Connector,
    S::Connection: RowSource,
    R: Connector,
    R::Connection: RowSource + ReplicaStore,
    W: Connector,
    W::Connection: WarehouseStore,
{
    pub fn new(tiers: Tiers<S, R, W>, config: EngineConfig, specs: Vec<TableSpec>) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();
        Self {
            tiers,
            config: Arc::new(config),
            specs,
            shutdown_tx,
        }
    }

    /// Handle requesting cooperative cancellation of the run.
    ///
    /// Running tables finish their in-flight batch and fail with [`ErrorKind::Cancelled`];
    /// tables that have not started are reported as cancelled.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    pub async fn run(self) -> SyncResult<RunReport> {
        let started_at = Utc::now();
        let specs = prioritize(self.specs);
        info!(
            tables = specs.len(),
            max_parallel_tables = self.config.pipeline.max_parallel_tables,
            "starting run"
        );

        let collector = ResultCollector::new(RunReport::new(started_at));
        let mut pool =
            WorkerPool::new(self.config.pipeline.max_parallel_tables, collector.clone());
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let processor = TableProcessor::new(self.tiers, self.config.clone(), shutdown_rx.clone());

        let mut pending = specs.into_iter();
        while let Some(spec) = pending.next() {
            let processor = processor.clone();
            let name = spec.name.clone();
            let work = async move { processor.process(&spec).await };

            let spawned = pool.spawn(name.clone(), work, &mut shutdown_rx).await?;
            if spawned.should_shutdown() {
                warn!(table = %name, "run cancelled before all tables started");
                let cancelled =
                    sync_error!(ErrorKind::Cancelled, "Run cancelled before the table started");
                collector
                    .record(TableRunResult::not_started(name, &cancelled))
                    .await;
                for spec in pending.by_ref() {
                    collector
                        .record(TableRunResult::not_started(spec.name, &cancelled))
                        .await;
                }
                break;
            }
        }

        pool.wait_all().await;

        let mut report = collector.snapshot().await;
        report.finish(Utc::now());

        info!(
            succeeded = report.successes().count(),
            failed = report.failures().count(),
            rows_extracted = report.total_rows_extracted(),
            rows_loaded = report.total_rows_loaded(),
            "run finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use tiersync_config::shared::ImportanceTier;

    use super::*;

    #[test]
    fn tables_are_ordered_by_tier_then_name() {
        let specs = vec![
            TableSpec::full("b").with_tier(ImportanceTier::Low),
            TableSpec::full("z").with_tier(ImportanceTier::Critical),
            TableSpec::full("a").with_tier(ImportanceTier::Low),
            TableSpec::full("m"),
        ];

        let names: Vec<_> = prioritize(specs).into_iter().map(|spec| spec.name).collect();
        assert_eq!(names, vec!["z", "m", "a", "b"]);
    }
}

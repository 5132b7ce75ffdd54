use std::future::Future;
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::TIERSYNC_TABLES_IN_FLIGHT;
use crate::report::{RunReport, TableRunResult};
use crate::sync_error;

/// Run-level collector of table results, shared by every worker.
#[derive(Debug, Clone)]
pub struct ResultCollector {
    inner: Arc<Mutex<RunReport>>,
}

impl ResultCollector {
    pub fn new(report: RunReport) -> Self {
        Self {
            inner: Arc::new(Mutex::new(report)),
        }
    }

    pub async fn record(&self, result: TableRunResult) {
        let mut report = self.inner.lock().await;
        report.record(result);
    }

    /// Returns a copy of the results collected so far.
    pub async fn snapshot(&self) -> RunReport {
        self.inner.lock().await.clone()
    }
}

/// Fixed-size pool running one table per worker.
///
/// A table is only spawned once a worker is free, so tables start in the order they are
/// submitted.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    collector: ResultCollector,
}

impl WorkerPool {
    pub fn new(max_parallel: u16, collector: ResultCollector) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(usize::from(max_parallel.max(1)))),
            tasks: JoinSet::new(),
            collector,
        }
    }

    /// Waits for a free worker and runs `work` on it.
    ///
    /// Returns [`ShutdownResult::Shutdown`] without spawning when shutdown is requested while
    /// waiting.
    pub async fn spawn<F>(
        &mut self,
        table_name: String,
        work: F,
        shutdown_rx: &mut ShutdownRx,
    ) -> SyncResult<ShutdownResult<(), ()>>
    where
        F: Future<Output = TableRunResult> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;

            _ = shutdown_rx.wait() => return Ok(ShutdownResult::Shutdown(())),
            permit = self.permits.clone().acquire_owned() => permit.map_err(|err| {
                sync_error!(ErrorKind::InvalidState, "Worker pool was closed", err.to_string())
            })?,
        };

        let collector = self.collector.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            gauge!(TIERSYNC_TABLES_IN_FLIGHT).increment(1.0);
            debug!(table = %table_name, "table worker started");

            // A panicking table is isolated in its own task and reported as a failed result.
            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(err) => {
                    error!(table = %table_name, error = %err, "table worker panicked");
                    let err = sync_error!(
                        ErrorKind::WorkerPanic,
                        "Table worker panicked",
                        err.to_string()
                    );
                    TableRunResult::not_started(&table_name, &err)
                }
            };

            gauge!(TIERSYNC_TABLES_IN_FLIGHT).decrement(1.0);
            collector.record(result).await;
        });

        Ok(ShutdownResult::Ok(()))
    }

    /// Waits until every spawned table has recorded its result.
    pub async fn wait_all(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "table worker task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    fn done(name: &str) -> TableRunResult {
        let mut result = TableRunResult::pending(name);
        result.success = true;
        result
    }

    #[tokio::test]
    async fn never_runs_more_tables_than_workers() {
        let collector = ResultCollector::new(RunReport::new(Utc::now()));
        let mut pool = WorkerPool::new(2, collector.clone());
        let (_tx, mut rx) = create_shutdown_channel();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for index in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            let name = format!("t{index}");
            let work_name = name.clone();
            pool.spawn(
                name,
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done(&work_name)
                },
                &mut rx,
            )
            .await
            .unwrap();
        }
        pool.wait_all().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(collector.snapshot().await.successes().count(), 6);
    }

    #[tokio::test]
    async fn panicking_table_becomes_a_failed_result() {
        let collector = ResultCollector::new(RunReport::new(Utc::now()));
        let mut pool = WorkerPool::new(1, collector.clone());
        let (_tx, mut rx) = create_shutdown_channel();

        pool.spawn(
            "broken".to_string(),
            async move {
                if true {
                    panic!("boom");
                }
                done("broken")
            },
            &mut rx,
        )
        .await
        .unwrap();
        pool.spawn("fine".to_string(), async move { done("fine") }, &mut rx)
            .await
            .unwrap();
        pool.wait_all().await;

        let report = collector.snapshot().await;
        let broken = report.get("broken").unwrap();
        assert!(!broken.success);
        assert!(
            broken
                .error
                .as_ref()
                .unwrap()
                .is_kind(ErrorKind::WorkerPanic)
        );
        assert!(report.get("fine").unwrap().success);
    }

    #[tokio::test]
    async fn shutdown_stops_spawning() {
        let collector = ResultCollector::new(RunReport::new(Utc::now()));
        let mut pool = WorkerPool::new(1, collector);
        let (tx, mut rx) = create_shutdown_channel();
        tx.shutdown();

        let spawned = pool
            .spawn("t".to_string(), async move { done("t") }, &mut rx)
            .await
            .unwrap();
        assert!(spawned.should_shutdown());
    }
}

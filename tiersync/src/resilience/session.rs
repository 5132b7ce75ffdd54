use std::fmt;
use std::future::Future;
use std::path::Path;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::database::{
    Connector, DatabaseRole, PageRequest, PrepareMode, ReplicaStore, RowFilter, RowSource,
    WarehouseStore,
};
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::{
    ROLE_LABEL, TIERSYNC_CONNECTIONS_OPENED_TOTAL, TIERSYNC_STATEMENT_RETRIES_TOTAL,
    TIERSYNC_STATEMENTS_EXHAUSTED_TOTAL,
};
use crate::resilience::policy::RetryPolicy;
use crate::state::{CopyProgress, LoadProgress};
use crate::sync_error;
use crate::types::{Cell, TableRow, TableSchema, TargetColumn, TargetSchema};

/// Counters of one session, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Statements that eventually succeeded.
    pub statements: u64,
    /// Attempts repeated after a transient failure.
    pub retries: u64,
    pub connections_opened: u64,
}

/// One connection to a tier plus its retry and rate limiting state.
///
/// A session is owned by the component that opened it and is never shared between tasks. The
/// connection is opened lazily on the first statement, replaced after a transient failure and
/// released when the session is dropped.
pub struct ResilientSession<K: Connector> {
    connector: K,
    connection: Option<K::Connection>,
    policy: RetryPolicy,
    last_statement_at: Option<Instant>,
    stats: SessionStats,
}

impl<K: Connector> fmt::Debug for ResilientSession<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientSession")
            .field("role", &self.role())
            .field("connected", &self.connection.is_some())
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<K: Connector> ResilientSession<K> {
    pub fn new(connector: K, policy: RetryPolicy) -> Self {
        Self {
            connector,
            connection: None,
            policy,
            last_statement_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn role(&self) -> DatabaseRole {
        self.connector.role()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Creates an independent session on the same tier with the same policy.
    pub fn fork(&self) -> Self {
        Self::new(self.connector.clone(), self.policy.clone())
    }

    /// Runs `op` on the session's connection, retrying transient failures.
    ///
    /// Each attempt waits for the rate limit, opens a connection when none is held and runs
    /// `op`. A transient failure discards the connection and, unless it was the last of
    /// `max_attempts` attempts, sleeps for the backoff before the next one. The last transient
    /// failure is returned as [`ErrorKind::ConnectionExhausted`]. Any other failure is returned
    /// immediately.
    pub async fn run<T, F, Fut>(&mut self, statement: &'static str, op: F) -> SyncResult<T>
    where
        F: Fn(K::Connection) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let role = self.role();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.throttle().await;
            let result = self.attempt(&op).await;
            self.last_statement_at = Some(Instant::now());

            let err = match result {
                Ok(value) => {
                    self.stats.statements += 1;
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            if let Some(connection) = self.connection.take() {
                self.connector.discard(connection).await;
            }

            if attempt >= max_attempts {
                error!(
                    %role,
                    statement,
                    attempts = attempt,
                    error = %err.summary(),
                    "statement failed after every attempt"
                );
                counter!(TIERSYNC_STATEMENTS_EXHAUSTED_TOTAL, ROLE_LABEL => role.as_str())
                    .increment(1);

                return Err(sync_error!(
                    ErrorKind::ConnectionExhausted,
                    "Statement failed after every attempt",
                    format!("'{statement}' on the {role} failed {attempt} times"),
                    source: err
                ));
            }

            let delay = self.policy.delay_for_retry(attempt - 1);
            warn!(
                %role,
                statement,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err.summary(),
                "transient failure, retrying statement"
            );
            counter!(TIERSYNC_STATEMENT_RETRIES_TOTAL, ROLE_LABEL => role.as_str()).increment(1);
            self.stats.retries += 1;

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<T, F, Fut>(&mut self, op: &F) -> SyncResult<T>
    where
        F: Fn(K::Connection) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        #[cfg(feature = "failpoints")]
        crate::failpoints::sync_fail_point(crate::failpoints::SESSION_BEFORE_STATEMENT)?;

        let connection = match &self.connection {
            Some(connection) => connection.clone(),
            None => {
                let connection = self.connector.connect().await?;
                self.stats.connections_opened += 1;
                counter!(TIERSYNC_CONNECTIONS_OPENED_TOTAL, ROLE_LABEL => self.role().as_str())
                    .increment(1);
                debug!(role = %self.role(), "opened connection");

                self.connection = Some(connection.clone());
                connection
            }
        };

        op(connection).await
    }

    /// Waits until the minimum interval since the previous statement has elapsed.
    async fn throttle(&self) {
        let interval = self.policy.min_statement_interval;
        if interval.is_zero() {
            return;
        }

        if let Some(last) = self.last_statement_at {
            let next = last + interval;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
    }
}

impl<K> ResilientSession<K>
where
    K: Connector,
    K::Connection: RowSource,
{
    pub async fn table_schema(&mut self, table: &str) -> SyncResult<TableSchema> {
        self.run("table_schema", move |conn| async move {
            conn.table_schema(table).await
        })
        .await
    }

    pub async fn count_rows(&mut self, table: &str, filter: &RowFilter) -> SyncResult<u64> {
        self.run("count_rows", move |conn| async move {
            conn.count_rows(table, filter).await
        })
        .await
    }

    pub async fn read_page(
        &mut self,
        schema: &TableSchema,
        request: &PageRequest,
    ) -> SyncResult<Vec<TableRow>> {
        self.run("read_page", move |conn| async move {
            conn.read_page(schema, request).await
        })
        .await
    }

    /// Streams the selected rows into `sender`.
    ///
    /// A retried stream starts over, so the receiver may see rows of a failed attempt twice.
    /// Streaming loads drop those rows by key.
    pub async fn stream_rows(
        &mut self,
        schema: &TableSchema,
        request: &PageRequest,
        sender: mpsc::Sender<TableRow>,
    ) -> SyncResult<u64> {
        self.run("stream_rows", move |conn| {
            let sender = sender.clone();
            async move { conn.stream_rows(schema, request, sender).await }
        })
        .await
    }

    pub async fn distinct_values(
        &mut self,
        schema: &TableSchema,
        column: &str,
        limit: usize,
    ) -> SyncResult<Vec<Cell>> {
        self.run("distinct_values", move |conn| async move {
            conn.distinct_values(schema, column, limit).await
        })
        .await
    }

    pub async fn column_bounds(
        &mut self,
        schema: &TableSchema,
        column: &str,
        filter: &RowFilter,
    ) -> SyncResult<Option<(Cell, Cell)>> {
        self.run("column_bounds", move |conn| async move {
            conn.column_bounds(schema, column, filter).await
        })
        .await
    }
}

impl<K> ResilientSession<K>
where
    K: Connector,
    K::Connection: ReplicaStore,
{
    pub async fn prepare_replica_table(
        &mut self,
        schema: &TableSchema,
        mode: PrepareMode,
    ) -> SyncResult<()> {
        self.run("prepare_replica_table", move |conn| async move {
            conn.prepare_replica_table(schema, mode).await
        })
        .await
    }

    pub async fn upsert_replica_rows(
        &mut self,
        schema: &TableSchema,
        rows: &[TableRow],
    ) -> SyncResult<u64> {
        self.run("upsert_replica_rows", move |conn| async move {
            conn.upsert_replica_rows(schema, rows).await
        })
        .await
    }

    pub async fn load_copy_progress(&mut self, table: &str) -> SyncResult<Option<CopyProgress>> {
        self.run("load_copy_progress", move |conn| async move {
            conn.load_copy_progress(table).await
        })
        .await
    }

    pub async fn store_copy_progress(&mut self, progress: &CopyProgress) -> SyncResult<()> {
        self.run("store_copy_progress", move |conn| async move {
            conn.store_copy_progress(progress).await
        })
        .await
    }

    pub async fn mark_copy_failed(&mut self, table: &str) -> SyncResult<()> {
        self.run("mark_copy_failed", move |conn| async move {
            conn.mark_copy_failed(table).await
        })
        .await
    }
}

impl<K> ResilientSession<K>
where
    K: Connector,
    K::Connection: WarehouseStore,
{
    pub async fn existing_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> SyncResult<Option<Vec<TargetColumn>>> {
        self.run("existing_columns", move |conn| async move {
            conn.existing_columns(schema, table).await
        })
        .await
    }

    pub async fn create_warehouse_table(&mut self, target: &TargetSchema) -> SyncResult<()> {
        self.run("create_warehouse_table", move |conn| async move {
            conn.create_warehouse_table(target).await
        })
        .await
    }

    pub async fn truncate_warehouse_table(&mut self, target: &TargetSchema) -> SyncResult<()> {
        self.run("truncate_warehouse_table", move |conn| async move {
            conn.truncate_warehouse_table(target).await
        })
        .await
    }

    pub async fn upsert_warehouse_rows(
        &mut self,
        target: &TargetSchema,
        rows: &[TableRow],
    ) -> SyncResult<u64> {
        self.run("upsert_warehouse_rows", move |conn| async move {
            conn.upsert_warehouse_rows(target, rows).await
        })
        .await
    }

    pub async fn bulk_load_file(&mut self, target: &TargetSchema, path: &Path) -> SyncResult<u64> {
        self.run("bulk_load_file", move |conn| async move {
            conn.bulk_load_file(target, path).await
        })
        .await
    }

    pub async fn count_warehouse_rows(&mut self, target: &TargetSchema) -> SyncResult<u64> {
        self.run("count_warehouse_rows", move |conn| async move {
            conn.count_warehouse_rows(target).await
        })
        .await
    }

    pub async fn max_warehouse_value(
        &mut self,
        target: &TargetSchema,
        column: &str,
    ) -> SyncResult<Option<String>> {
        self.run("max_warehouse_value", move |conn| async move {
            conn.max_warehouse_value(target, column).await
        })
        .await
    }

    pub async fn load_load_progress(&mut self, table: &str) -> SyncResult<Option<LoadProgress>> {
        self.run("load_load_progress", move |conn| async move {
            conn.load_load_progress(table).await
        })
        .await
    }

    pub async fn store_load_progress(&mut self, progress: &LoadProgress) -> SyncResult<()> {
        self.run("store_load_progress", move |conn| async move {
            conn.store_load_progress(progress).await
        })
        .await
    }

    pub async fn mark_load_failed(&mut self, table: &str) -> SyncResult<()> {
        self.run("mark_load_failed", move |conn| async move {
            conn.mark_load_failed(table).await
        })
        .await
    }
}

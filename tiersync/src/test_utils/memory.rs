use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, mpsc};

use crate::bail;
use crate::conversions::{hex, numeric, temporal};
use crate::database::csv::read_staging_file;
use crate::database::{
    Connector, DatabaseRole, PageRequest, PrepareMode, ReplicaStore, RowFilter, RowSource,
    WarehouseStore,
};
use crate::error::{ErrorKind, SyncResult};
use crate::state::{CopyProgress, CopyStatus, LoadProgress, LoadStatus};
use crate::types::{
    Cell, TableRow, TableSchema, TargetColumn, TargetSchema, WarehouseType, compare_keys,
};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<TableRow>,
}

#[derive(Debug, Clone)]
struct WarehouseTable {
    target: TargetSchema,
    rows: Vec<TableRow>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_connects: u32,
    always_fail_connect: bool,
    failing_statements: u32,
    stream_failure_after: Option<usize>,
    table_errors: HashMap<String, ErrorKind>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, MemoryTable>,
    warehouse: BTreeMap<(String, String), WarehouseTable>,
    copy_progress: BTreeMap<String, CopyProgress>,
    load_progress: BTreeMap<String, LoadProgress>,
    faults: Faults,
    connect_attempts: u64,
    statements: u64,
}

/// In-memory stand-in for one database tier.
///
/// The same type plays the source, the replica or the warehouse depending on the role of the
/// connector created from it. Tests keep a clone to seed data, inject faults and inspect what
/// the engine wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self, role: DatabaseRole) -> MemoryConnector {
        MemoryConnector {
            db: self.clone(),
            role,
        }
    }

    /// Creates (or replaces) a MySQL-tier table holding `rows`.
    pub async fn create_table(&self, schema: TableSchema, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .insert(schema.name.clone(), MemoryTable { schema, rows });
    }

    /// Inserts rows into a MySQL-tier table, replacing rows with the same primary key.
    ///
    /// # Panics
    ///
    /// Panics if the table does not exist.
    pub async fn insert_rows(&self, table: &str, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        let table = inner.tables.get_mut(table).expect("table does not exist");
        let positions = key_positions(&table.schema);
        upsert_rows(&mut table.rows, rows, positions.as_deref());
    }

    pub async fn table_schema(&self, table: &str) -> Option<TableSchema> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|table| table.schema.clone())
    }

    /// Rows of a MySQL-tier table ordered by primary key (or by every column).
    pub async fn table_rows(&self, table: &str) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        let Some(table) = inner.tables.get(table) else {
            return Vec::new();
        };

        let mut rows = table.rows.clone();
        let order = table.schema.paging_order(&[]);
        let positions = table.schema.positions(&order);
        rows.sort_by(|left, right| compare_keys(&left.values, &right.values, &positions));
        rows
    }

    /// Creates a warehouse table directly, bypassing the engine.
    pub async fn create_warehouse_table(&self, target: TargetSchema) {
        let mut inner = self.inner.lock().await;
        inner.warehouse.insert(
            (target.schema.clone(), target.name.clone()),
            WarehouseTable {
                target,
                rows: Vec::new(),
            },
        );
    }

    pub async fn warehouse_columns(&self, schema: &str, table: &str) -> Option<Vec<TargetColumn>> {
        let inner = self.inner.lock().await;
        inner
            .warehouse
            .get(&warehouse_key(schema, table))
            .map(|table| table.target.columns.clone())
    }

    /// Rows of a warehouse table ordered by primary key (or by every column).
    pub async fn warehouse_rows(&self, schema: &str, table: &str) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        let Some(table) = inner.warehouse.get(&warehouse_key(schema, table)) else {
            return Vec::new();
        };

        let mut rows = table.rows.clone();
        let positions = warehouse_order(&table.target);
        rows.sort_by(|left, right| compare_keys(&left.values, &right.values, &positions));
        rows
    }

    /// Keeps only the warehouse rows matching `keep`, simulating rows lost downstream.
    pub async fn retain_warehouse_rows<F>(&self, schema: &str, table: &str, keep: F)
    where
        F: Fn(&TableRow) -> bool,
    {
        let mut inner = self.inner.lock().await;
        if let Some(table) = inner.warehouse.get_mut(&warehouse_key(schema, table)) {
            table.rows.retain(|row| keep(row));
        }
    }

    pub async fn copy_progress(&self, table: &str) -> Option<CopyProgress> {
        let inner = self.inner.lock().await;
        inner.copy_progress.get(table).cloned()
    }

    pub async fn load_progress(&self, table: &str) -> Option<LoadProgress> {
        let inner = self.inner.lock().await;
        inner.load_progress.get(table).cloned()
    }

    /// Fails the next `count` connection attempts with a transient error.
    pub async fn fail_next_connects(&self, count: u32) {
        self.inner.lock().await.faults.failing_connects = count;
    }

    /// Fails every connection attempt with a transient error.
    pub async fn fail_every_connect(&self) {
        self.inner.lock().await.faults.always_fail_connect = true;
    }

    /// Fails the next `count` statements with a transient error.
    pub async fn fail_next_statements(&self, count: u32) {
        self.inner.lock().await.faults.failing_statements = count;
    }

    /// Makes the next row stream drop its connection after sending `rows` rows.
    pub async fn fail_next_stream_after(&self, rows: usize) {
        self.inner.lock().await.faults.stream_failure_after = Some(rows);
    }

    /// Fails every statement touching `table` with an error of `kind`.
    pub async fn fail_table(&self, table: &str, kind: ErrorKind) {
        self.inner
            .lock()
            .await
            .faults
            .table_errors
            .insert(table.to_string(), kind);
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults = Faults::default();
    }

    /// Connection attempts made so far, failed ones included.
    pub async fn connect_attempts(&self) -> u64 {
        self.inner.lock().await.connect_attempts
    }

    /// Statements received so far, failed ones included.
    pub async fn statements(&self) -> u64 {
        self.inner.lock().await.statements
    }
}

/// Opens [`MemoryConnection`]s to a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    db: MemoryDatabase,
    role: DatabaseRole,
}

impl MemoryConnector {
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    fn role(&self) -> DatabaseRole {
        self.role
    }

    async fn connect(&self) -> SyncResult<MemoryConnection> {
        let mut inner = self.db.inner.lock().await;
        inner.connect_attempts += 1;

        if inner.faults.always_fail_connect {
            bail!(
                self.role.connection_error_kind(),
                "Injected connection failure"
            );
        }
        if inner.faults.failing_connects > 0 {
            inner.faults.failing_connects -= 1;
            bail!(
                self.role.connection_error_kind(),
                "Injected connection failure"
            );
        }

        Ok(MemoryConnection {
            db: self.db.clone(),
            role: self.role,
        })
    }
}

/// Connection to a [`MemoryDatabase`], implementing every tier trait.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    role: DatabaseRole,
}

impl MemoryConnection {
    /// Starts a statement: counts it, applies injected faults and locks the database.
    async fn begin(&self, table: &str) -> SyncResult<MutexGuard<'_, Inner>> {
        let mut inner = self.db.inner.lock().await;
        inner.statements += 1;

        if inner.faults.failing_statements > 0 {
            inner.faults.failing_statements -= 1;
            bail!(
                self.role.connection_error_kind(),
                "Injected connection failure"
            );
        }
        if let Some(kind) = inner.faults.table_errors.get(table).copied() {
            bail!(kind, "Injected statement failure", table);
        }

        Ok(inner)
    }

    fn missing_table<T>(&self, table: &str) -> SyncResult<T> {
        bail!(
            self.role.query_error_kind(),
            "Table does not exist",
            table
        );
    }
}

impl RowSource for MemoryConnection {
    async fn table_schema(&self, table: &str) -> SyncResult<TableSchema> {
        let inner = self.begin(table).await?;
        match inner.tables.get(table) {
            Some(table) => Ok(table.schema.clone()),
            None => bail!(
                ErrorKind::SourceSchemaError,
                "Table does not exist",
                table
            ),
        }
    }

    async fn count_rows(&self, table: &str, filter: &RowFilter) -> SyncResult<u64> {
        let inner = self.begin(table).await?;
        let Some(stored) = inner.tables.get(table) else {
            return self.missing_table(table);
        };

        let count = stored
            .rows
            .iter()
            .filter(|row| filter.matches(&stored.schema, row))
            .count();
        Ok(count as u64)
    }

    async fn read_page(
        &self,
        schema: &TableSchema,
        request: &PageRequest,
    ) -> SyncResult<Vec<TableRow>> {
        let inner = self.begin(&schema.name).await?;
        let Some(stored) = inner.tables.get(&schema.name) else {
            return self.missing_table(&schema.name);
        };

        Ok(select(schema, &stored.rows, request))
    }

    async fn stream_rows(
        &self,
        schema: &TableSchema,
        request: &PageRequest,
        sender: mpsc::Sender<TableRow>,
    ) -> SyncResult<u64> {
        let (rows, fail_after) = {
            let mut inner = self.begin(&schema.name).await?;
            let fail_after = inner.faults.stream_failure_after.take();
            let Some(stored) = inner.tables.get(&schema.name) else {
                return self.missing_table(&schema.name);
            };
            (select(schema, &stored.rows, request), fail_after)
        };

        let mut sent: u64 = 0;
        for row in rows {
            if fail_after.is_some_and(|after| after as u64 == sent) {
                bail!(
                    self.role.connection_error_kind(),
                    "Injected connection failure",
                    format!("stream of {} dropped after {sent} rows", schema.name)
                );
            }
            if sender.send(row).await.is_err() {
                break;
            }
            sent += 1;
        }

        Ok(sent)
    }

    async fn distinct_values(
        &self,
        schema: &TableSchema,
        column: &str,
        limit: usize,
    ) -> SyncResult<Vec<Cell>> {
        let inner = self.begin(&schema.name).await?;
        let Some(stored) = inner.tables.get(&schema.name) else {
            return self.missing_table(&schema.name);
        };
        let Some(index) = schema.column_index(column) else {
            bail!(
                self.role.query_error_kind(),
                "Unknown column",
                format!("{}.{column}", schema.name)
            );
        };

        let mut values: Vec<Cell> = Vec::new();
        for value in stored.rows.iter().filter_map(|row| row.values.get(index)) {
            if values.len() >= limit {
                break;
            }
            if value.is_null() || values.iter().any(|seen| seen.compare(value).is_eq()) {
                continue;
            }
            values.push(value.clone());
        }

        Ok(values)
    }

    async fn column_bounds(
        &self,
        schema: &TableSchema,
        column: &str,
        filter: &RowFilter,
    ) -> SyncResult<Option<(Cell, Cell)>> {
        let inner = self.begin(&schema.name).await?;
        let Some(stored) = inner.tables.get(&schema.name) else {
            return self.missing_table(&schema.name);
        };
        let Some(index) = schema.column_index(column) else {
            bail!(
                self.role.query_error_kind(),
                "Unknown column",
                format!("{}.{column}", schema.name)
            );
        };

        let mut bounds: Option<(Cell, Cell)> = None;
        let values = stored
            .rows
            .iter()
            .filter(|row| filter.matches(schema, row))
            .filter_map(|row| row.values.get(index))
            .filter(|value| !value.is_null());
        for value in values {
            bounds = Some(match bounds {
                None => (value.clone(), value.clone()),
                Some((min, max)) => {
                    let min = if value.compare(&min).is_lt() {
                        value.clone()
                    } else {
                        min
                    };
                    let max = if value.compare(&max).is_gt() {
                        value.clone()
                    } else {
                        max
                    };
                    (min, max)
                }
            });
        }

        Ok(bounds)
    }
}

impl ReplicaStore for MemoryConnection {
    async fn prepare_replica_table(&self, schema: &TableSchema, mode: PrepareMode) -> SyncResult<()> {
        let mut inner = self.begin(&schema.name).await?;
        let table = MemoryTable {
            schema: schema.clone(),
            rows: Vec::new(),
        };

        match mode {
            PrepareMode::Recreate => {
                inner.tables.insert(schema.name.clone(), table);
            }
            PrepareMode::KeepExisting => {
                inner.tables.entry(schema.name.clone()).or_insert(table);
            }
        }

        Ok(())
    }

    async fn upsert_replica_rows(&self, schema: &TableSchema, rows: &[TableRow]) -> SyncResult<u64> {
        let mut inner = self.begin(&schema.name).await?;
        let Some(table) = inner.tables.get_mut(&schema.name) else {
            return self.missing_table(&schema.name);
        };

        if let Some(row) = rows
            .iter()
            .find(|row| row.values.len() != table.schema.columns.len())
        {
            bail!(
                ErrorKind::ReplicaQueryFailed,
                "Row does not match the table columns",
                format!(
                    "{} values for {} columns of {}",
                    row.values.len(),
                    table.schema.columns.len(),
                    schema.name
                )
            );
        }

        let positions = key_positions(&table.schema);
        upsert_rows(&mut table.rows, rows.to_vec(), positions.as_deref());

        Ok(rows.len() as u64)
    }

    async fn load_copy_progress(&self, table: &str) -> SyncResult<Option<CopyProgress>> {
        let inner = self.begin(table).await?;
        Ok(inner.copy_progress.get(table).cloned())
    }

    async fn store_copy_progress(&self, progress: &CopyProgress) -> SyncResult<()> {
        let mut inner = self.begin(&progress.table_name).await?;
        inner
            .copy_progress
            .insert(progress.table_name.clone(), progress.clone());
        Ok(())
    }

    async fn mark_copy_failed(&self, table: &str) -> SyncResult<()> {
        let mut inner = self.begin(table).await?;
        if let Some(progress) = inner.copy_progress.get_mut(table) {
            progress.status = CopyStatus::Failed;
            progress.updated_at = Utc::now();
        }
        Ok(())
    }
}

impl WarehouseStore for MemoryConnection {
    async fn existing_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> SyncResult<Option<Vec<TargetColumn>>> {
        let inner = self.begin(table).await?;
        Ok(inner
            .warehouse
            .get(&warehouse_key(schema, table))
            .map(|table| table.target.columns.clone()))
    }

    async fn create_warehouse_table(&self, target: &TargetSchema) -> SyncResult<()> {
        let mut inner = self.begin(&target.name).await?;
        inner
            .warehouse
            .entry(warehouse_key(&target.schema, &target.name))
            .or_insert_with(|| WarehouseTable {
                target: target.clone(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn truncate_warehouse_table(&self, target: &TargetSchema) -> SyncResult<()> {
        let mut inner = self.begin(&target.name).await?;
        let Some(table) = inner
            .warehouse
            .get_mut(&warehouse_key(&target.schema, &target.name))
        else {
            return self.missing_table(&target.full_name());
        };

        table.rows.clear();
        Ok(())
    }

    async fn upsert_warehouse_rows(&self, target: &TargetSchema, rows: &[TableRow]) -> SyncResult<u64> {
        let mut inner = self.begin(&target.name).await?;
        let Some(table) = inner
            .warehouse
            .get_mut(&warehouse_key(&target.schema, &target.name))
        else {
            return self.missing_table(&target.full_name());
        };

        write_warehouse_rows(table, target, rows.to_vec())
    }

    async fn bulk_load_file(&self, target: &TargetSchema, path: &Path) -> SyncResult<u64> {
        let records = read_staging_file(path).await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            if record.len() != target.columns.len() {
                bail!(
                    ErrorKind::WarehouseQueryFailed,
                    "Staged record does not match the table columns",
                    format!("{} fields for {}", record.len(), target.full_name())
                );
            }

            let values = record
                .iter()
                .zip(&target.columns)
                .map(|(field, column)| match field {
                    None => Ok(Cell::Null),
                    Some(text) => parse_text_value(text, &column.data_type),
                })
                .collect::<SyncResult<Vec<_>>>()?;
            rows.push(TableRow::new(values));
        }

        let mut inner = self.begin(&target.name).await?;
        let Some(table) = inner
            .warehouse
            .get_mut(&warehouse_key(&target.schema, &target.name))
        else {
            return self.missing_table(&target.full_name());
        };

        write_warehouse_rows(table, target, rows)
    }

    async fn count_warehouse_rows(&self, target: &TargetSchema) -> SyncResult<u64> {
        let inner = self.begin(&target.name).await?;
        let Some(table) = inner
            .warehouse
            .get(&warehouse_key(&target.schema, &target.name))
        else {
            return self.missing_table(&target.full_name());
        };

        Ok(table.rows.len() as u64)
    }

    async fn max_warehouse_value(
        &self,
        target: &TargetSchema,
        column: &str,
    ) -> SyncResult<Option<String>> {
        let inner = self.begin(&target.name).await?;
        let Some(table) = inner
            .warehouse
            .get(&warehouse_key(&target.schema, &target.name))
        else {
            return self.missing_table(&target.full_name());
        };
        let Some(index) = table
            .target
            .columns
            .iter()
            .position(|existing| existing.name == column)
        else {
            bail!(
                ErrorKind::WarehouseQueryFailed,
                "Unknown column",
                format!("{}.{column}", target.full_name())
            );
        };

        let max = table
            .rows
            .iter()
            .filter_map(|row| row.values.get(index))
            .filter(|value| !value.is_null())
            .max_by(|left, right| left.compare(right));

        Ok(max.and_then(Cell::to_text))
    }

    async fn load_load_progress(&self, table: &str) -> SyncResult<Option<LoadProgress>> {
        let inner = self.begin(table).await?;
        Ok(inner.load_progress.get(table).cloned())
    }

    async fn store_load_progress(&self, progress: &LoadProgress) -> SyncResult<()> {
        let mut inner = self.begin(&progress.table_name).await?;
        let now = Utc::now();
        let created_at = inner
            .load_progress
            .get(&progress.table_name)
            .and_then(|existing| existing.created_at)
            .or(progress.created_at)
            .unwrap_or(now);

        let mut stored = progress.clone();
        stored.created_at = Some(created_at);
        stored.updated_at = Some(now);
        inner
            .load_progress
            .insert(progress.table_name.clone(), stored);

        Ok(())
    }

    async fn mark_load_failed(&self, table: &str) -> SyncResult<()> {
        let mut inner = self.begin(table).await?;
        if let Some(progress) = inner.load_progress.get_mut(table) {
            progress.status = LoadStatus::Failed;
            progress.updated_at = Some(Utc::now());
        }
        Ok(())
    }
}

fn warehouse_key(schema: &str, table: &str) -> (String, String) {
    (schema.to_string(), table.to_string())
}

/// Positions of the primary key, `None` for tables without one.
fn key_positions(schema: &TableSchema) -> Option<Vec<usize>> {
    if schema.has_primary_key() {
        Some(schema.positions(&schema.primary_key))
    } else {
        None
    }
}

fn warehouse_order(target: &TargetSchema) -> Vec<usize> {
    if target.primary_key.is_empty() {
        return (0..target.columns.len()).collect();
    }

    target
        .primary_key
        .iter()
        .filter_map(|key| target.columns.iter().position(|column| &column.name == key))
        .collect()
}

/// Replaces rows with the same key and appends the others. Keyless rows are always appended.
fn upsert_rows(stored: &mut Vec<TableRow>, rows: Vec<TableRow>, key: Option<&[usize]>) {
    for row in rows {
        let existing = key.and_then(|positions| {
            stored
                .iter()
                .position(|current| compare_keys(&current.values, &row.values, positions).is_eq())
        });

        match existing {
            Some(index) => stored[index] = row,
            None => stored.push(row),
        }
    }
}

/// Upserts rows laid out as `target` into a warehouse table, remapping them onto the columns
/// of the stored table.
fn write_warehouse_rows(
    table: &mut WarehouseTable,
    target: &TargetSchema,
    rows: Vec<TableRow>,
) -> SyncResult<u64> {
    if let Some(row) = rows
        .iter()
        .find(|row| row.values.len() != target.columns.len())
    {
        bail!(
            ErrorKind::WarehouseQueryFailed,
            "Row does not match the table columns",
            format!(
                "{} values for {} columns of {}",
                row.values.len(),
                target.columns.len(),
                target.full_name()
            )
        );
    }

    let written = rows.len() as u64;
    let sources: Vec<Option<usize>> = table
        .target
        .columns
        .iter()
        .map(|column| {
            target
                .columns
                .iter()
                .position(|candidate| candidate.name == column.name)
        })
        .collect();
    let rows = rows
        .into_iter()
        .map(|row| {
            let values = sources
                .iter()
                .map(|source| {
                    source
                        .and_then(|index| row.values.get(index))
                        .cloned()
                        .unwrap_or(Cell::Null)
                })
                .collect();
            TableRow::new(values)
        })
        .collect();

    let key = if table.target.primary_key.is_empty() {
        None
    } else {
        Some(warehouse_order(&table.target))
    };
    upsert_rows(&mut table.rows, rows, key.as_deref());

    Ok(written)
}

/// Applies a page request: filter and cursor, then order and limit.
fn select(schema: &TableSchema, rows: &[TableRow], request: &PageRequest) -> Vec<TableRow> {
    let mut selected: Vec<TableRow> = rows
        .iter()
        .filter(|row| request.admits(schema, row))
        .cloned()
        .collect();

    let positions = schema.positions(&request.order_by);
    selected.sort_by(|left, right| compare_keys(&left.values, &right.values, &positions));
    if let Some(limit) = request.limit {
        selected.truncate(limit);
    }

    selected
}

/// Parses a staged CSV field back into a value of its warehouse column type.
fn parse_text_value(text: &str, typ: &WarehouseType) -> SyncResult<Cell> {
    let cell = match typ {
        WarehouseType::Boolean => match text {
            "true" | "t" => Cell::Bool(true),
            "false" | "f" => Cell::Bool(false),
            other => bail!(
                ErrorKind::InvalidData,
                "Invalid boolean in staged file",
                other
            ),
        },
        WarehouseType::SmallInt | WarehouseType::Integer | WarehouseType::BigInt => {
            Cell::I64(text.parse()?)
        }
        WarehouseType::Numeric { .. } => Cell::Numeric(numeric::parse_decimal(text)?),
        WarehouseType::Real | WarehouseType::DoublePrecision => Cell::F64(text.parse()?),
        WarehouseType::Bytea => Cell::Bytes(hex::parse_bytea_hex(text)?),
        WarehouseType::Date => Cell::Date(temporal::parse_date(text)?),
        WarehouseType::Time => Cell::Time(temporal::parse_time(text)?),
        WarehouseType::Timestamp => Cell::DateTime(temporal::parse_timestamp(text)?),
        WarehouseType::TimestampTz => Cell::TimestampTz(temporal::parse_timestamptz(text)?),
        WarehouseType::Jsonb => Cell::Json(serde_json::from_str(text)?),
        WarehouseType::VarChar { .. } | WarehouseType::Text | WarehouseType::Other(_) => {
            Cell::String(text.to_string())
        }
    };

    Ok(cell)
}

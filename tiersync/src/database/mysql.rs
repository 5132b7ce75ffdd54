//! MySQL backend shared by the source and the replica.

use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use metrics::counter;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Connection, Decode, Executor, Row};
use tiersync_config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use tiersync_mysql::schema::{
    BoundKind, MARK_COPY_FAILED, RangeClause, SELECT_COPY_PROGRESS, SelectQuery,
    TABLE_COLUMNS_QUERY, UPSERT_COPY_PROGRESS, column_bounds_sql, count_rows_sql,
    create_if_missing, distinct_values_sql, drop_table_sql, keyset_bind_order,
    max_rows_per_insert, select_rows_sql, show_create_table_sql, upsert_rows_sql,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::bail;
use crate::conversions::numeric::parse_decimal;
use crate::database::{
    Connector, DatabaseRole, PageRequest, PrepareMode, ReplicaStore, RowFilter, RowSource,
};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{TABLE_NAME_LABEL, TIERSYNC_CONVERSION_FAILURES_TOTAL};
use crate::resilience::classify::DatabaseResultExt;
use crate::state::{CopyProgress, CopyStatus};
use crate::types::{Cell, ColumnDefinition, MySqlType, TableRow, TableSchema};

/// Opens pooled connections to the source or the replica.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    role: DatabaseRole,
    pool: MySqlPool,
}

impl MySqlConnector {
    /// Builds a lazily connecting pool. Nothing is opened before the first statement.
    ///
    /// Replica connections disable foreign key checks since tables are copied in any order.
    pub fn new(role: DatabaseRole, config: &MySqlConnectionConfig) -> Self {
        let replica = role == DatabaseRole::Replica;
        let pool = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout())
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if replica {
                        conn.execute("set session foreign_key_checks = 0").await?;
                    }
                    Ok(())
                })
            })
            .connect_lazy_with(config.with_db());

        Self { role, pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl Connector for MySqlConnector {
    type Connection = MySqlClient;

    fn role(&self) -> DatabaseRole {
        self.role
    }

    async fn connect(&self) -> SyncResult<MySqlClient> {
        let connection = self
            .pool
            .acquire()
            .await
            .or_db_error(self.role, "Failed to open MySQL connection")?;

        Ok(MySqlClient {
            role: self.role,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Closes the connection instead of returning it to the pool.
    async fn discard(&self, client: MySqlClient) {
        let Ok(connection) = Arc::try_unwrap(client.connection) else {
            return;
        };

        if let Err(err) = connection.into_inner().detach().close().await {
            debug!(role = %self.role, error = %err, "failed to close discarded connection");
        }
    }
}

/// Handle on one pooled MySQL connection.
#[derive(Debug, Clone)]
pub struct MySqlClient {
    role: DatabaseRole,
    connection: Arc<Mutex<PoolConnection<MySql>>>,
}

impl MySqlClient {
    fn decode_row(&self, schema: &TableSchema, row: &MySqlRow) -> TableRow {
        let values = schema
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| match decode_cell(row, index, &column.typ) {
                Ok(cell) => cell,
                Err(err) => {
                    warn!(
                        role = %self.role,
                        table = %schema.name,
                        column = %column.name,
                        error = %err.summary(),
                        "value could not be decoded, storing NULL"
                    );
                    counter!(TIERSYNC_CONVERSION_FAILURES_TOTAL, TABLE_NAME_LABEL => schema.name.clone())
                        .increment(1);
                    Cell::Null
                }
            })
            .collect();

        TableRow::new(values)
    }
}

impl RowSource for MySqlClient {
    async fn table_schema(&self, table: &str) -> SyncResult<TableSchema> {
        let mut connection = self.connection.lock().await;

        let rows = sqlx::query(TABLE_COLUMNS_QUERY)
            .bind(table)
            .fetch_all(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to read table columns")?;

        if rows.is_empty() {
            bail!(
                ErrorKind::SourceSchemaError,
                "Table not found",
                format!("table '{table}' does not exist on the {}", self.role)
            );
        }

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row
                .try_get("column_name")
                .or_db_error(self.role, "Failed to decode column name")?;
            let data_type: String = row
                .try_get("data_type")
                .or_db_error(self.role, "Failed to decode column data type")?;
            let column_type: String = row
                .try_get("column_type")
                .or_db_error(self.role, "Failed to decode column type")?;
            let is_nullable: String = row
                .try_get("is_nullable")
                .or_db_error(self.role, "Failed to decode column nullability")?;
            let pk_position: Option<i64> = row
                .try_get("pk_position")
                .or_db_error(self.role, "Failed to decode primary key position")?;

            definitions.push(ColumnDefinition {
                typ: MySqlType::parse(&data_type, &column_type),
                name,
                column_type,
                nullable: is_nullable.eq_ignore_ascii_case("yes"),
                primary_key_position: pk_position.and_then(|position| u32::try_from(position).ok()),
            });
        }

        let create = sqlx::query(&show_create_table_sql(table))
            .fetch_one(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to read table definition")?;
        let create_statement: String = create
            .try_get_unchecked(1)
            .or_db_error(self.role, "Failed to decode table definition")?;

        Ok(TableSchema::from_definitions(
            table,
            definitions,
            Some(create_statement),
        ))
    }

    async fn count_rows(&self, table: &str, filter: &RowFilter) -> SyncResult<u64> {
        let (ranges, binds) = range_binds(filter);
        let sql = count_rows_sql(table, &ranges);

        let mut query = sqlx::query(&sql);
        for cell in binds {
            query = bind_cell(query, cell);
        }

        let mut connection = self.connection.lock().await;
        let row = query
            .fetch_one(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to count rows")?;
        let count: i64 = row
            .try_get(0)
            .or_db_error(self.role, "Failed to decode row count")?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn read_page(
        &self,
        schema: &TableSchema,
        request: &PageRequest,
    ) -> SyncResult<Vec<TableRow>> {
        let sql = select_sql(schema, request);
        let mut query = sqlx::query(&sql);
        for cell in select_binds(request) {
            query = bind_cell(query, cell);
        }

        let mut connection = self.connection.lock().await;
        let rows = query
            .fetch_all(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to read rows")?;

        Ok(rows.iter().map(|row| self.decode_row(schema, row)).collect())
    }

    async fn stream_rows(
        &self,
        schema: &TableSchema,
        request: &PageRequest,
        sender: mpsc::Sender<TableRow>,
    ) -> SyncResult<u64> {
        let sql = select_sql(schema, request);
        let mut query = sqlx::query(&sql);
        for cell in select_binds(request) {
            query = bind_cell(query, cell);
        }

        let mut connection = self.connection.lock().await;
        let mut rows = query.fetch(&mut **connection);
        let mut sent = 0;

        while let Some(row) = rows
            .try_next()
            .await
            .or_db_error(self.role, "Failed to stream rows")?
        {
            if sender.send(self.decode_row(schema, &row)).await.is_err() {
                debug!(table = %schema.name, "row receiver dropped, stopping stream");
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
        let typ = column_type(schema, column)?;
        let sql = distinct_values_sql(&schema.name, column, limit);

        let mut connection = self.connection.lock().await;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to sample distinct values")?;

        rows.iter().map(|row| decode_cell(row, 0, typ)).collect()
    }

    async fn column_bounds(
        &self,
        schema: &TableSchema,
        column: &str,
        filter: &RowFilter,
    ) -> SyncResult<Option<(Cell, Cell)>> {
        let typ = column_type(schema, column)?;
        let (ranges, binds) = range_binds(filter);
        let sql = column_bounds_sql(&schema.name, column, &ranges);

        let mut query = sqlx::query(&sql);
        for cell in binds {
            query = bind_cell(query, cell);
        }

        let mut connection = self.connection.lock().await;
        let row = query
            .fetch_one(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to read column bounds")?;

        let min = decode_cell(&row, 0, typ)?;
        let max = decode_cell(&row, 1, typ)?;
        if min.is_null() || max.is_null() {
            return Ok(None);
        }

        Ok(Some((min, max)))
    }
}

impl ReplicaStore for MySqlClient {
    async fn prepare_replica_table(&self, schema: &TableSchema, mode: PrepareMode) -> SyncResult<()> {
        let Some(create_statement) = schema.create_statement.as_deref() else {
            bail!(
                ErrorKind::InvalidState,
                "Table definition missing",
                format!("no create statement was read for table '{}'", schema.name)
            );
        };

        let mut connection = self.connection.lock().await;
        match mode {
            PrepareMode::Recreate => {
                connection
                    .execute(drop_table_sql(&schema.name).as_str())
                    .await
                    .or_db_error(self.role, "Failed to drop replica table")?;
                connection
                    .execute(create_statement)
                    .await
                    .or_db_error(self.role, "Failed to create replica table")?;
            }
            PrepareMode::KeepExisting => {
                connection
                    .execute(create_if_missing(create_statement).as_str())
                    .await
                    .or_db_error(self.role, "Failed to create replica table")?;
            }
        }

        Ok(())
    }

    async fn upsert_replica_rows(&self, schema: &TableSchema, rows: &[TableRow]) -> SyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let columns = schema.column_names();
        let keys: Vec<&str> = schema.primary_key.iter().map(String::as_str).collect();
        let mut written = 0;

        let mut connection = self.connection.lock().await;
        for chunk in rows.chunks(max_rows_per_insert(columns.len())) {
            let sql = upsert_rows_sql(&schema.name, &columns, &keys, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for cell in &row.values {
                    query = bind_cell(query, cell);
                }
            }

            query
                .execute(&mut **connection)
                .await
                .or_db_error(self.role, "Failed to upsert replica rows")?;
            written += chunk.len() as u64;
        }

        Ok(written)
    }

    async fn load_copy_progress(&self, table: &str) -> SyncResult<Option<CopyProgress>> {
        let mut connection = self.connection.lock().await;
        let row = sqlx::query(SELECT_COPY_PROGRESS)
            .bind(table)
            .fetch_optional(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to read copy progress")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row
            .try_get("copy_status")
            .or_db_error(self.role, "Failed to decode copy status")?;
        let last_success_at: Option<NaiveDateTime> = row
            .try_get("last_success_at")
            .or_db_error(self.role, "Failed to decode last success time")?;
        let updated_at: NaiveDateTime = row
            .try_get("updated_at")
            .or_db_error(self.role, "Failed to decode update time")?;
        let copy_duration_ms: Option<u64> = row
            .try_get("copy_duration_ms")
            .or_db_error(self.role, "Failed to decode copy duration")?;

        Ok(Some(CopyProgress {
            table_name: row
                .try_get("table_name")
                .or_db_error(self.role, "Failed to decode table name")?,
            rows_copied: row
                .try_get("rows_copied")
                .or_db_error(self.role, "Failed to decode copied rows")?,
            status: CopyStatus::try_from(status.as_str())?,
            last_primary_value: row
                .try_get("last_primary_value")
                .or_db_error(self.role, "Failed to decode last primary value")?,
            primary_column_name: row
                .try_get("primary_column_name")
                .or_db_error(self.role, "Failed to decode primary column name")?,
            copy_duration_ms: copy_duration_ms.unwrap_or_default(),
            last_success_at: last_success_at.map(|at| at.and_utc()),
            updated_at: updated_at.and_utc(),
        }))
    }

    async fn store_copy_progress(&self, progress: &CopyProgress) -> SyncResult<()> {
        let mut connection = self.connection.lock().await;
        sqlx::query(UPSERT_COPY_PROGRESS)
            .bind(&progress.table_name)
            .bind(progress.rows_copied)
            .bind(progress.status.as_static_str())
            .bind(&progress.last_primary_value)
            .bind(&progress.primary_column_name)
            .bind(progress.copy_duration_ms)
            .bind(progress.last_success_at.map(|at| at.naive_utc()))
            .bind(progress.updated_at.naive_utc())
            .execute(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to store copy progress")?;

        Ok(())
    }

    async fn mark_copy_failed(&self, table: &str) -> SyncResult<()> {
        let mut connection = self.connection.lock().await;
        sqlx::query(MARK_COPY_FAILED)
            .bind(table)
            .execute(&mut **connection)
            .await
            .or_db_error(self.role, "Failed to mark copy as failed")?;

        Ok(())
    }
}

fn column_type<'a>(schema: &'a TableSchema, column: &str) -> SyncResult<&'a MySqlType> {
    match schema.column(column) {
        Some(column) => Ok(&column.typ),
        None => bail!(
            ErrorKind::SourceSchemaError,
            "Column not found",
            format!("table '{}' has no column '{column}'", schema.name)
        ),
    }
}

fn select_sql(schema: &TableSchema, request: &PageRequest) -> String {
    let (ranges, _) = range_binds(&request.filter);
    let query = SelectQuery {
        ranges,
        order_by: request.order_by.iter().map(String::as_str).collect(),
        keyset: request.after.is_some(),
        limit: request.limit,
    };

    select_rows_sql(&schema.name, &schema.column_names(), &query)
}

/// Values to bind for [`select_sql`], in placeholder order.
fn select_binds(request: &PageRequest) -> Vec<&Cell> {
    let (_, mut binds) = range_binds(&request.filter);
    if let Some(cursor) = &request.after {
        binds.extend(
            keyset_bind_order(cursor.len())
                .into_iter()
                .map(|index| &cursor[index]),
        );
    }
    binds
}

/// Splits a filter into range clauses and the values bound by them, in placeholder order.
fn range_binds(filter: &RowFilter) -> (Vec<RangeClause<'_>>, Vec<&Cell>) {
    let mut clauses = Vec::with_capacity(filter.ranges.len());
    let mut binds = Vec::new();

    for range in &filter.ranges {
        let lower = bound_kind(&range.lower);
        let upper = bound_kind(&range.upper);

        for bound in [&range.lower, &range.upper] {
            if let Bound::Included(value) | Bound::Excluded(value) = bound {
                binds.push(value);
            }
        }

        clauses.push(RangeClause {
            column: &range.column,
            lower,
            upper,
        });
    }

    (clauses, binds)
}

fn bound_kind(bound: &Bound<Cell>) -> BoundKind {
    match bound {
        Bound::Unbounded => BoundKind::Unbounded,
        Bound::Included(_) => BoundKind::Inclusive,
        Bound::Excluded(_) => BoundKind::Exclusive,
    }
}

fn bind_cell<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    cell: &Cell,
) -> Query<'q, MySql, MySqlArguments> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Bool(value) => query.bind(*value),
        Cell::I64(value) => query.bind(*value),
        Cell::U64(value) => query.bind(*value),
        Cell::F64(value) => query.bind(*value),
        Cell::String(value) => query.bind(value.clone()),
        Cell::Bytes(value) => query.bind(value.clone()),
        Cell::Date(value) => query.bind(*value),
        Cell::Time(value) => query.bind(*value),
        Cell::DateTime(value) => query.bind(*value),
        Cell::TimestampTz(value) => query.bind(*value),
        // Decimals and documents are sent as text and parsed by the server.
        Cell::Numeric(_) | Cell::Json(_) => query.bind(cell.to_text()),
    }
}

fn get<'r, T>(row: &'r MySqlRow, index: usize) -> SyncResult<Option<T>>
where
    T: Decode<'r, MySql>,
{
    row.try_get_unchecked::<Option<T>, _>(index)
        .map_err(|err| SyncError::wrap(ErrorKind::ConversionError, "Failed to decode value", err))
}

/// Decodes the value at `index` according to the declared column type.
fn decode_cell(row: &MySqlRow, index: usize, typ: &MySqlType) -> SyncResult<Cell> {
    let cell = match typ {
        MySqlType::TinyInt { unsigned: false }
        | MySqlType::SmallInt { unsigned: false }
        | MySqlType::MediumInt { unsigned: false }
        | MySqlType::Int { unsigned: false }
        | MySqlType::BigInt { unsigned: false }
        | MySqlType::Year => get::<i64>(row, index)?.map(Cell::I64),
        MySqlType::TinyInt { unsigned: true }
        | MySqlType::SmallInt { unsigned: true }
        | MySqlType::MediumInt { unsigned: true }
        | MySqlType::Int { unsigned: true }
        | MySqlType::BigInt { unsigned: true } => get::<u64>(row, index)?.map(Cell::U64),
        MySqlType::Decimal { .. } => match get::<String>(row, index)? {
            Some(text) => Some(Cell::Numeric(parse_decimal(&text)?)),
            None => None,
        },
        MySqlType::Float => get::<f32>(row, index)?.map(|value| Cell::F64(f64::from(value))),
        MySqlType::Double => get::<f64>(row, index)?.map(Cell::F64),
        MySqlType::Bit { width: 1 } => get::<bool>(row, index)?.map(Cell::Bool),
        MySqlType::Bit { .. } => get::<u64>(row, index)?.map(Cell::U64),
        MySqlType::Char { .. }
        | MySqlType::VarChar { .. }
        | MySqlType::Text
        | MySqlType::Enum
        | MySqlType::Set => get::<String>(row, index)?.map(Cell::String),
        MySqlType::Binary | MySqlType::Blob => get::<Vec<u8>>(row, index)?.map(Cell::Bytes),
        MySqlType::Date => get::<NaiveDate>(row, index)?.map(Cell::Date),
        MySqlType::Time => get::<NaiveTime>(row, index)?.map(Cell::Time),
        MySqlType::DateTime => get::<NaiveDateTime>(row, index)?.map(Cell::DateTime),
        MySqlType::Timestamp => get::<DateTime<Utc>>(row, index)?.map(Cell::TimestampTz),
        MySqlType::Json => get::<Json<serde_json::Value>>(row, index)?
            .map(|Json(value)| Cell::Json(value)),
        MySqlType::Other(_) => match get::<String>(row, index) {
            Ok(value) => value.map(Cell::String),
            Err(_) => get::<Vec<u8>>(row, index)?.map(Cell::Bytes),
        },
    };

    Ok(cell.unwrap_or(Cell::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ColumnRange;

    #[test]
    fn range_binds_follow_placeholder_order() {
        let filter = RowFilter::after("DateModified", Cell::I64(5), false).and(ColumnRange {
            column: "Id".to_string(),
            lower: Bound::Included(Cell::I64(10)),
            upper: Bound::Excluded(Cell::I64(20)),
        });

        let (clauses, binds) = range_binds(&filter);
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].lower, BoundKind::Exclusive);
        assert_eq!(clauses[0].upper, BoundKind::Unbounded);
        assert_eq!(clauses[1].bind_count(), 2);
        assert_eq!(binds, vec![&Cell::I64(5), &Cell::I64(10), &Cell::I64(20)]);
    }

    #[test]
    fn keyset_values_follow_range_values() {
        let request = PageRequest {
            filter: RowFilter::after("DateModified", Cell::I64(1), false),
            order_by: vec!["DateModified".to_string(), "Id".to_string()],
            after: Some(vec![Cell::I64(7), Cell::I64(42)]),
            limit: Some(10),
        };

        assert_eq!(
            select_binds(&request),
            vec![
                &Cell::I64(1),
                &Cell::I64(7),
                &Cell::I64(7),
                &Cell::I64(7),
                &Cell::I64(42),
                &Cell::I64(42),
            ]
        );
    }

    #[test]
    fn null_cursor_values_are_bound_as_null() {
        let request = PageRequest {
            order_by: vec!["DateModified".to_string(), "Id".to_string()],
            after: Some(vec![Cell::Null, Cell::I64(500)]),
            limit: Some(500),
            ..PageRequest::default()
        };

        assert_eq!(
            select_binds(&request),
            vec![
                &Cell::Null,
                &Cell::Null,
                &Cell::Null,
                &Cell::I64(500),
                &Cell::I64(500),
            ]
        );
    }
}

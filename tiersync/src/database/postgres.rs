//! PostgreSQL backend of the warehouse.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, Executor, Postgres, Row};
use tiersync_config::shared::{IntoConnectOptions, PgConnectionConfig};
use tiersync_postgres::schema::{
    ColumnDef, EXISTING_COLUMNS_QUERY, MARK_LOAD_FAILED, SELECT_LOAD_PROGRESS,
    UPSERT_LOAD_PROGRESS, copy_from_stdin_sql, count_rows_sql, create_schema_sql,
    create_staging_table_sql, create_table_sql, drop_staging_table_sql, max_rows_per_insert,
    max_value_sql, merge_staging_sql, truncate_table_sql, upsert_rows_sql,
};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::{Connector, DatabaseRole, WarehouseStore};
use crate::error::{SyncError, SyncResult};
use crate::resilience::classify::DatabaseResultExt;
use crate::state::{LoadProgress, LoadStatus};
use crate::types::{TableRow, TargetColumn, TargetSchema, WarehouseType};

/// Size of the chunks read from a staged file and sent through `COPY`.
const COPY_CHUNK_SIZE: usize = 256 * 1024;

const ROLE: DatabaseRole = DatabaseRole::Warehouse;

/// Opens pooled connections to the warehouse.
#[derive(Debug, Clone)]
pub struct PgConnector {
    pool: PgPool,
}

impl PgConnector {
    /// Builds a lazily connecting pool. Nothing is opened before the first statement.
    pub fn new(config: &PgConnectionConfig) -> Self {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy_with(config.with_db());

        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Connector for PgConnector {
    type Connection = PgClient;

    fn role(&self) -> DatabaseRole {
        ROLE
    }

    async fn connect(&self) -> SyncResult<PgClient> {
        let connection = self
            .pool
            .acquire()
            .await
            .or_db_error(ROLE, "Failed to open PostgreSQL connection")?;

        Ok(PgClient {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn discard(&self, client: PgClient) {
        let Ok(connection) = Arc::try_unwrap(client.connection) else {
            return;
        };

        if let Err(err) = connection.into_inner().detach().close().await {
            debug!(error = %err, "failed to close discarded warehouse connection");
        }
    }
}

/// Handle on one pooled warehouse connection.
#[derive(Debug, Clone)]
pub struct PgClient {
    connection: Arc<Mutex<PoolConnection<Postgres>>>,
}

/// Column types rendered as DDL, kept alive while [`ColumnDef`]s borrow them.
fn type_names(target: &TargetSchema) -> Vec<String> {
    target
        .columns
        .iter()
        .map(|column| column.data_type.as_sql())
        .collect()
}

fn column_defs<'a>(target: &'a TargetSchema, type_names: &'a [String]) -> Vec<ColumnDef<'a>> {
    target
        .columns
        .iter()
        .zip(type_names)
        .map(|(column, type_sql)| ColumnDef {
            name: &column.name,
            type_sql,
            nullable: column.nullable,
        })
        .collect()
}

impl WarehouseStore for PgClient {
    async fn existing_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> SyncResult<Option<Vec<TargetColumn>>> {
        let mut connection = self.connection.lock().await;
        let rows = sqlx::query(EXISTING_COLUMNS_QUERY)
            .bind(schema)
            .bind(table)
            .fetch_all(&mut **connection)
            .await
            .or_db_error(ROLE, "Failed to read warehouse columns")?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let data_type: String = row
                .try_get("data_type")
                .or_db_error(ROLE, "Failed to decode column data type")?;
            let character_maximum_length: Option<i32> = row
                .try_get("character_maximum_length")
                .or_db_error(ROLE, "Failed to decode column length")?;
            let numeric_precision: Option<i32> = row
                .try_get("numeric_precision")
                .or_db_error(ROLE, "Failed to decode column precision")?;
            let numeric_scale: Option<i32> = row
                .try_get("numeric_scale")
                .or_db_error(ROLE, "Failed to decode column scale")?;

            columns.push(TargetColumn {
                name: row
                    .try_get("column_name")
                    .or_db_error(ROLE, "Failed to decode column name")?,
                data_type: WarehouseType::from_information_schema(
                    &data_type,
                    character_maximum_length,
                    numeric_precision,
                    numeric_scale,
                ),
                nullable: row
                    .try_get("nullable")
                    .or_db_error(ROLE, "Failed to decode column nullability")?,
            });
        }

        Ok(Some(columns))
    }

    async fn create_warehouse_table(&self, target: &TargetSchema) -> SyncResult<()> {
        let type_names = type_names(target);
        let columns = column_defs(target, &type_names);
        let create_table = create_table_sql(
            &target.schema,
            &target.name,
            &columns,
            &target.primary_key(),
        );

        let mut connection = self.connection.lock().await;
        connection
            .execute(create_schema_sql(&target.schema).as_str())
            .await
            .or_db_error(ROLE, "Failed to create warehouse schema")?;
        connection
            .execute(create_table.as_str())
            .await
            .or_db_error(ROLE, "Failed to create warehouse table")?;

        info!(table = %target.full_name(), "created warehouse table");

        Ok(())
    }

    async fn truncate_warehouse_table(&self, target: &TargetSchema) -> SyncResult<()> {
        let mut connection = self.connection.lock().await;
        connection
            .execute(truncate_table_sql(&target.schema, &target.name).as_str())
            .await
            .or_db_error(ROLE, "Failed to truncate warehouse table")?;

        Ok(())
    }

    async fn upsert_warehouse_rows(&self, target: &TargetSchema, rows: &[TableRow]) -> SyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let type_names = type_names(target);
        let columns = column_defs(target, &type_names);
        let primary_key = target.primary_key();
        let mut written = 0;

        let mut connection = self.connection.lock().await;
        for chunk in rows.chunks(max_rows_per_insert(columns.len())) {
            let sql = upsert_rows_sql(
                &target.schema,
                &target.name,
                &columns,
                &primary_key,
                chunk.len(),
            );

            let mut query = sqlx::query(&sql);
            for row in chunk {
                for cell in &row.values {
                    query = query.bind(cell.to_text());
                }
            }

            query
                .execute(&mut **connection)
                .await
                .or_db_error(ROLE, "Failed to upsert warehouse rows")?;
            written += chunk.len() as u64;
        }

        Ok(written)
    }

    /// Copies the file into a temporary staging table, then merges it into the target.
    ///
    /// The staging table lives on this connection only and is dropped before returning.
    async fn bulk_load_file(&self, target: &TargetSchema, path: &Path) -> SyncResult<u64> {
        let type_names = type_names(target);
        let columns = column_defs(target, &type_names);
        let staging = format!("tiersync_stage_{}", Uuid::new_v4().simple());

        let mut connection = self.connection.lock().await;
        connection
            .execute(create_staging_table_sql(&staging, &target.schema, &target.name).as_str())
            .await
            .or_db_error(ROLE, "Failed to create staging table")?;

        let result = async {
            let mut file = tokio::fs::File::open(path).await?;
            let mut copy = connection
                .copy_in_raw(&copy_from_stdin_sql(&staging, &columns))
                .await
                .or_db_error(ROLE, "Failed to start copy")?;

            let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
            loop {
                let read = match file.read(&mut buffer).await {
                    Ok(read) => read,
                    Err(err) => {
                        if let Err(abort_err) = copy.abort("staging file read failed").await {
                            warn!(error = %abort_err, "failed to abort copy");
                        }
                        return Err(SyncError::from(err));
                    }
                };
                if read == 0 {
                    break;
                }

                copy.send(&buffer[..read])
                    .await
                    .or_db_error(ROLE, "Failed to send staged rows")?;
            }

            let copied = copy
                .finish()
                .await
                .or_db_error(ROLE, "Failed to finish copy")?;

            connection
                .execute(
                    merge_staging_sql(
                        &staging,
                        &target.schema,
                        &target.name,
                        &columns,
                        &target.primary_key(),
                    )
                    .as_str(),
                )
                .await
                .or_db_error(ROLE, "Failed to merge staged rows")?;

            Ok::<_, SyncError>(copied)
        }
        .await;

        if let Err(err) = connection
            .execute(drop_staging_table_sql(&staging).as_str())
            .await
        {
            warn!(staging = %staging, error = %err, "failed to drop staging table");
        }

        result
    }

    async fn count_warehouse_rows(&self, target: &TargetSchema) -> SyncResult<u64> {
        let mut connection = self.connection.lock().await;
        let row = sqlx::query(&count_rows_sql(&target.schema, &target.name))
            .fetch_one(&mut **connection)
            .await
            .or_db_error(ROLE, "Failed to count warehouse rows")?;
        let count: i64 = row
            .try_get(0)
            .or_db_error(ROLE, "Failed to decode warehouse row count")?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn max_warehouse_value(
        &self,
        target: &TargetSchema,
        column: &str,
    ) -> SyncResult<Option<String>> {
        let mut connection = self.connection.lock().await;
        let row = sqlx::query(&max_value_sql(&target.schema, &target.name, column))
            .fetch_one(&mut **connection)
            .await
            .or_db_error(ROLE, "Failed to read warehouse maximum")?;

        row.try_get(0)
            .or_db_error(ROLE, "Failed to decode warehouse maximum")
    }

    async fn load_load_progress(&self, table: &str) -> SyncResult<Option<LoadProgress>> {
        let mut connection = self.connection.lock().await;
        let row = sqlx::query(SELECT_LOAD_PROGRESS)
            .bind(table)
            .fetch_optional(&mut **connection)
            .await
            .or_db_error(ROLE, "Failed to read load progress")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rows_loaded: i64 = row
            .try_get("rows_loaded")
            .or_db_error(ROLE, "Failed to decode loaded rows")?;
        let status: String = row
            .try_get("load_status")
            .or_db_error(ROLE, "Failed to decode load status")?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .or_db_error(ROLE, "Failed to decode creation time")?;
        let updated_at: DateTime<Utc> = row
            .try_get("updated_at")
            .or_db_error(ROLE, "Failed to decode update time")?;

        Ok(Some(LoadProgress {
            table_name: row
                .try_get("table_name")
                .or_db_error(ROLE, "Failed to decode table name")?,
            rows_loaded: u64::try_from(rows_loaded).unwrap_or_default(),
            status: LoadStatus::try_from(status.as_str())?,
            load_strategy: row
                .try_get("load_strategy")
                .or_db_error(ROLE, "Failed to decode load strategy")?,
            last_loaded_at: row
                .try_get("last_loaded_at")
                .or_db_error(ROLE, "Failed to decode last load time")?,
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        }))
    }

    async fn store_load_progress(&self, progress: &LoadProgress) -> SyncResult<()> {
        let rows_loaded = i64::try_from(progress.rows_loaded).unwrap_or(i64::MAX);

        let mut connection = self.connection.lock().await;
        sqlx::query(UPSERT_LOAD_PROGRESS)
            .bind(&progress.table_name)
            .bind(rows_loaded)
            .bind(progress.status.as_static_str())
            .bind(&progress.load_strategy)
            .bind(progress.last_loaded_at)
            .execute(&mut **connection)
            .await
            .or_db_error(ROLE, "Failed to store load progress")?;

        Ok(())
    }

    async fn mark_load_failed(&self, table: &str) -> SyncResult<()> {
        let mut connection = self.connection.lock().await;
        sqlx::query(MARK_LOAD_FAILED)
            .bind(table)
            .execute(&mut **connection)
            .await
            .or_db_error(ROLE, "Failed to mark load as failed")?;

        Ok(())
    }
}

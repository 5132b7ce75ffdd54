use sqlx::Executor;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

const NUM_POOL_CONNECTIONS: u32 = 1;

/// Schema holding the engine's own tables in the warehouse.
pub const STATE_SCHEMA: &str = "tiersync";

/// Creates or upgrades the `tiersync.load_progress` table in the warehouse.
///
/// The migration bookkeeping table lives in the same schema so it does not clutter the
/// schema receiving the replicated tables.
pub async fn migrate_warehouse(options: PgConnectOptions) -> Result<(), sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .min_connections(NUM_POOL_CONNECTIONS)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists tiersync;").await?;
                conn.execute("set search_path = 'tiersync';").await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    pool.close().await;

    Ok(())
}

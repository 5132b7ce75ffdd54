use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

const NUM_POOL_CONNECTIONS: u32 = 1;

/// Creates or upgrades the `copy_progress` table in the replica database.
pub async fn migrate_replica(options: MySqlConnectOptions) -> Result<(), sqlx::Error> {
    let pool = MySqlPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    pool.close().await;

    Ok(())
}

/// Runs the embedded migrations on an existing pool.
pub async fn run_migrations(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;

    Ok(())
}

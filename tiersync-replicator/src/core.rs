use tiersync::concurrency::shutdown::ShutdownTx;
use tiersync::config::EngineConfig;
use tiersync::database::DatabaseRole;
use tiersync::database::mysql::MySqlConnector;
use tiersync::database::postgres::PgConnector;
use tiersync::report::RunReport;
use tiersync::workers::Tiers;
use tiersync::workers::priority::Orchestrator;
use tiersync_config::shared::{
    IntoConnectOptions, LoadConfig, MySqlConnectionConfig, PgConnectionConfig, PipelineConfig,
    ReplicatorConfig,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::error::{ReplicatorError, ReplicatorResult};

/// Runs every configured table once and returns the run report.
///
/// Migrates the progress tables first. Connectors open their pools lazily, so an unreachable
/// source only fails the tables, not the run.
pub async fn run_with_config(config: ReplicatorConfig) -> ReplicatorResult<RunReport> {
    info!(tables = config.tables.len(), "starting replicator");
    log_config(&config);

    migrate(&config).await?;

    let tiers = Tiers::new(
        MySqlConnector::new(DatabaseRole::Source, &config.source),
        MySqlConnector::new(DatabaseRole::Replica, &config.replica),
        PgConnector::new(&config.warehouse),
    );
    let orchestrator = Orchestrator::new(
        tiers,
        EngineConfig::from_replicator(&config),
        config.table_specs(),
    );

    let shutdown_handle = tokio::spawn(shutdown_on_signal(orchestrator.shutdown_tx()));
    let report = orchestrator.run().await;

    // The run may finish before any signal arrives.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    report.map_err(ReplicatorError::from)
}

async fn migrate(config: &ReplicatorConfig) -> ReplicatorResult<()> {
    info!("migrating the replica progress table");
    tiersync_mysql::migrations::migrate_replica(config.replica.with_db()).await?;

    info!("migrating the warehouse progress table");
    tiersync_postgres::migrations::migrate_warehouse(config.warehouse.with_db()).await?;

    Ok(())
}

/// Requests a cooperative shutdown of the run on SIGINT or SIGTERM.
///
/// Tables finish their in-flight batch, record their progress and are reported as cancelled.
async fn shutdown_on_signal(shutdown_tx: ShutdownTx) {
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to register the sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for ctrl+c, the run cannot be interrupted");
                return;
            }
            info!("sigint (ctrl+c) received, stopping run");
        }
        _ = sigterm => {
            info!("sigterm received, stopping run");
        }
    }

    shutdown_tx.shutdown();
}

fn log_config(config: &ReplicatorConfig) {
    log_mysql_connection_config("source", &config.source);
    log_mysql_connection_config("replica", &config.replica);
    log_pg_connection_config(&config.warehouse);
    log_pipeline_config(&config.pipeline);
    log_load_config(&config.load);
}

fn log_mysql_connection_config(role: &str, config: &MySqlConnectionConfig) {
    debug!(
        role,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        pool_size = config.pool_size,
        "mysql connection config"
    );
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        pool_size = config.pool_size,
        require_tls = config.require_tls,
        "warehouse connection config"
    );
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        max_parallel_tables = config.max_parallel_tables,
        extract_timeout_ms = config.extract_timeout_ms,
        load_timeout_ms = config.load_timeout_ms,
        warehouse_schema = config.warehouse_schema,
        force_full_refresh = config.force_full_refresh,
        "pipeline config"
    );
}

fn log_load_config(config: &LoadConfig) {
    debug!(
        standard_max_rows = config.standard_max_rows,
        chunked_max_rows = config.chunked_max_rows,
        streaming_max_rows = config.streaming_max_rows,
        bulk_file_min_size_mb = config.bulk_file_min_size_mb,
        chunk_size = config.chunk_size,
        parallel_workers = config.parallel_workers,
        "load config"
    );
}

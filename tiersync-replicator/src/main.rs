//! Replicator binary.
//!
//! Runs one replication-and-load pass over every configured table: source MySQL to replica
//! MySQL, then replica to the PostgreSQL warehouse. The run report is printed as JSON on
//! stdout and the exit code tells whether every table succeeded.

use std::process::ExitCode;

use clap::Parser;
use tiersync::report::RunReport;
use tiersync_config::shared::ReplicatorConfig;
use tiersync_telemetry::metrics::init_metrics;
use tiersync_telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::load_replicator_config;
use crate::core::run_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod config;
mod core;
mod error;

/// Exit code of a run in which at least one table failed.
const TABLES_FAILED_EXIT_CODE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "tiersync-replicator", about = "Replicates MySQL tables into a warehouse")]
struct Args {
    /// Copies every incremental table in full for this run.
    #[arg(long)]
    full_refresh: bool,

    /// Restricts the run to the given tables. May be repeated.
    #[arg(long = "table", value_name = "NAME")]
    tables: Vec<String>,
}

impl Args {
    /// Applies the command line overrides on top of the loaded configuration.
    fn apply(self, config: &mut ReplicatorConfig) -> ReplicatorResult<()> {
        if self.full_refresh {
            config.pipeline.force_full_refresh = true;
        }

        if self.tables.is_empty() {
            return Ok(());
        }

        if let Some(unknown) = self
            .tables
            .iter()
            .find(|table| !config.tables.contains_key(table.as_str()))
        {
            return Err(ReplicatorError::UnknownTable(unknown.clone()));
        }
        config
            .tables
            .retain(|name, _| self.tables.iter().any(|table| table == name));

        Ok(())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match try_main(args) {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(TABLES_FAILED_EXIT_CODE),
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn try_main(args: Args) -> ReplicatorResult<RunReport> {
    let mut replicator_config = load_replicator_config()?;
    args.apply(&mut replicator_config)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    let report = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replicator_config));

    if let Err(err) = &report {
        error!(error = %err, "replicator failed");
    }

    report
}

async fn async_main(replicator_config: ReplicatorConfig) -> ReplicatorResult<RunReport> {
    if let Some(bind) = replicator_config.metrics_bind.as_deref() {
        init_metrics(Some(bind), env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;
        info!(bind, "serving metrics");
    }

    let report = run_with_config(replicator_config).await?;

    for failure in report.failures() {
        if let Some(err) = &failure.error {
            error!(
                table = %failure.table_name,
                phase = %err.phase.as_static_str(),
                kind = %err.kind,
                message = %err.message,
                "table failed"
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tiersync_config::shared::TableSettings;

    use super::*;

    fn config_with_tables(names: &[&str]) -> ReplicatorConfig {
        let mut tables = serde_json::Map::new();
        for name in names {
            tables.insert(name.to_string(), serde_json::json!({}));
        }

        serde_json::from_value(serde_json::json!({
            "source": { "host": "source", "port": 3306, "name": "app", "username": "reader" },
            "replica": { "host": "localhost", "port": 3306, "name": "app", "username": "root" },
            "warehouse": { "host": "localhost", "port": 5432, "name": "dw", "username": "postgres" },
            "tables": tables,
        }))
        .unwrap()
    }

    fn table_names(tables: &BTreeMap<String, TableSettings>) -> Vec<&str> {
        tables.keys().map(String::as_str).collect()
    }

    #[test]
    fn table_arguments_restrict_the_run() {
        let mut config = config_with_tables(&["a", "b", "c"]);
        let args = Args::parse_from(["tiersync-replicator", "--table", "c", "--table", "a"]);

        args.apply(&mut config).unwrap();

        assert_eq!(table_names(&config.tables), vec!["a", "c"]);
        assert!(!config.pipeline.force_full_refresh);
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let mut config = config_with_tables(&["a"]);
        let args = Args::parse_from(["tiersync-replicator", "--table", "missing"]);

        let err = args.apply(&mut config).unwrap_err();

        assert!(matches!(err, ReplicatorError::UnknownTable(table) if table == "missing"));
    }

    #[test]
    fn full_refresh_flag_forces_a_full_copy() {
        let mut config = config_with_tables(&["a"]);
        let args = Args::parse_from(["tiersync-replicator", "--full-refresh"]);

        args.apply(&mut config).unwrap();

        assert!(config.pipeline.force_full_refresh);
        assert_eq!(table_names(&config.tables), vec!["a"]);
    }
}

//! Metric names and labels recorded by the engine.

/// Label for the table name.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the database tier a metric refers to (`source`, `replica` or `warehouse`).
pub const ROLE_LABEL: &str = "role";

/// Label for the extraction or load strategy used.
pub const STRATEGY_LABEL: &str = "strategy";

/// Label for the outcome of a table run (`success`, `failed` or `cancelled`).
pub const OUTCOME_LABEL: &str = "outcome";

// Resilience metrics

/// Counter of statement attempts retried after a transient error.
pub const TIERSYNC_STATEMENT_RETRIES_TOTAL: &str = "tiersync_statement_retries_total";

/// Counter of statements that failed after exhausting every attempt.
pub const TIERSYNC_STATEMENTS_EXHAUSTED_TOTAL: &str = "tiersync_statements_exhausted_total";

/// Counter of connections opened by the resilience layer.
pub const TIERSYNC_CONNECTIONS_OPENED_TOTAL: &str = "tiersync_connections_opened_total";

// Extraction metrics

/// Counter of rows copied from the source into the replica.
pub const TIERSYNC_ROWS_EXTRACTED_TOTAL: &str = "tiersync_rows_extracted_total";

/// Counter of the approximate in-memory bytes of the rows copied into the replica.
pub const TIERSYNC_BYTES_EXTRACTED_TOTAL: &str = "tiersync_bytes_extracted_total";

/// Histogram of extraction durations in seconds.
pub const TIERSYNC_EXTRACT_DURATION_SECONDS: &str = "tiersync_extract_duration_seconds";

/// Counter of incremental runs escalated to a full refresh.
pub const TIERSYNC_FULL_REFRESH_ESCALATIONS_TOTAL: &str = "tiersync_full_refresh_escalations_total";

/// Counter of source rows skipped because the replica rejected them.
pub const TIERSYNC_ROWS_SKIPPED_TOTAL: &str = "tiersync_rows_skipped_total";

// Load metrics

/// Counter of rows written into the warehouse.
pub const TIERSYNC_ROWS_LOADED_TOTAL: &str = "tiersync_rows_loaded_total";

/// Histogram of load durations in seconds.
pub const TIERSYNC_LOAD_DURATION_SECONDS: &str = "tiersync_load_duration_seconds";

/// Counter of warehouse tables found stale and fully reloaded.
pub const TIERSYNC_STALE_STATE_RECOVERIES_TOTAL: &str = "tiersync_stale_state_recoveries_total";

/// Counter of loads whose verification counts did not match.
pub const TIERSYNC_VERIFICATION_MISMATCHES_TOTAL: &str = "tiersync_verification_mismatches_total";

/// Counter of values nulled because they could not be converted.
pub const TIERSYNC_CONVERSION_FAILURES_TOTAL: &str = "tiersync_conversion_failures_total";

// Orchestration metrics

/// Counter of finished table runs, labeled by outcome.
pub const TIERSYNC_TABLE_RUNS_TOTAL: &str = "tiersync_table_runs_total";

/// Gauge of tables currently being processed.
pub const TIERSYNC_TABLES_IN_FLIGHT: &str = "tiersync_tables_in_flight";

/// Histogram of whole table run durations in seconds.
pub const TIERSYNC_TABLE_RUN_DURATION_SECONDS: &str = "tiersync_table_run_duration_seconds";

use tiersync::database::DatabaseRole;
use tiersync::error::ErrorKind;
use tiersync::resilience::{ResilientSession, RetryPolicy};
use tiersync::test_utils::fixtures::{
    MemoryTiers, PATIENT_TABLE, patient_rows, patient_schema, patient_spec, test_config,
};
use tiersync::test_utils::memory::{MemoryConnector, MemoryDatabase};
use tiersync::workers::priority::Orchestrator;
use tiersync_config::shared::RetryTierConfig;
use tiersync_telemetry::tracing::init_test_tracing;

async fn source_session(max_attempts: u32) -> (MemoryDatabase, ResilientSession<MemoryConnector>) {
    let database = MemoryDatabase::new();
    database
        .create_table(patient_schema(), patient_rows())
        .await;
    let policy = RetryPolicy::from_tier(&RetryTierConfig::new(max_attempts, 1, 5, 0));
    let session = ResilientSession::new(database.connector(DatabaseRole::Source), policy);

    (database, session)
}

#[tokio::test(flavor = "multi_thread")]
async fn statement_gives_up_after_max_attempts_test() {
    init_test_tracing();
    let (database, mut session) = source_session(4).await;
    database.fail_every_connect().await;

    let err = session.table_schema(PATIENT_TABLE).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionExhausted);
    assert_eq!(database.connect_attempts().await, 4);
    assert_eq!(database.statements().await, 0);
    assert_eq!(session.stats().retries, 3);
    assert_eq!(session.stats().statements, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_connect_failures_are_retried_test() {
    init_test_tracing();
    let (database, mut session) = source_session(3).await;
    database.fail_next_connects(2).await;

    let schema = session.table_schema(PATIENT_TABLE).await.unwrap();

    assert_eq!(schema, patient_schema());
    assert_eq!(database.connect_attempts().await, 3);
    let stats = session.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.statements, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_statement_replaces_the_connection_test() {
    init_test_tracing();
    let (database, mut session) = source_session(3).await;

    session.table_schema(PATIENT_TABLE).await.unwrap();
    assert_eq!(session.stats().connections_opened, 1);

    database.fail_next_statements(1).await;
    session.table_schema(PATIENT_TABLE).await.unwrap();

    assert_eq!(session.stats().connections_opened, 2);
    assert_eq!(database.statements().await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_errors_are_not_retried_test() {
    init_test_tracing();
    let (database, mut session) = source_session(5).await;
    database
        .fail_table(PATIENT_TABLE, ErrorKind::SourceQueryFailed)
        .await;

    let err = session.table_schema(PATIENT_TABLE).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(database.statements().await, 1);
    assert_eq!(session.stats().retries, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_survives_transient_failures_on_every_tier_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(patient_schema(), patient_rows())
        .await;
    tiers.source.fail_next_connects(2).await;
    tiers.replica.fail_next_statements(2).await;
    tiers.warehouse.fail_next_statements(2).await;

    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
        .run()
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.get(PATIENT_TABLE).unwrap().rows_loaded, 3);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_only_the_table_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(patient_schema(), patient_rows())
        .await;
    tiers.warehouse.fail_every_connect().await;

    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
        .run()
        .await
        .unwrap();

    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(!patient.success);
    assert_eq!(patient.rows_extracted, 3);
    assert!(
        patient
            .error
            .as_ref()
            .unwrap()
            .is_kind(ErrorKind::ConnectionExhausted)
    );
    // The copy into the replica is kept for the next run.
    assert_eq!(tiers.replica.table_rows(PATIENT_TABLE).await.len(), 3);
}

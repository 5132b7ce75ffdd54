use tiersync::error::ErrorKind;
use tiersync::failpoints::{EXTRACT_AFTER_PAGE, LOAD_AFTER_ENSURE_TABLE, SESSION_BEFORE_STATEMENT};
use tiersync::report::TablePhase;
use tiersync::state::{CopyStatus, LoadStatus};
use tiersync::test_utils::failpoints::SyncFailScenario;
use tiersync::test_utils::fixtures::{
    MemoryTiers, PATIENT_TABLE, patient_rows, patient_schema, patient_spec, test_config,
};
use tiersync::workers::priority::Orchestrator;
use tiersync_config::shared::ExtractionStrategy;
use tiersync_telemetry::tracing::init_test_tracing;

async fn seeded_patient_tiers() -> MemoryTiers {
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(patient_schema(), patient_rows())
        .await;
    tiers
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_copy_resumes_from_the_last_committed_page_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;

    {
        let _scenario = SyncFailScenario::setup(&[(EXTRACT_AFTER_PAGE, "return(fatal)")]);

        let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
            .run()
            .await
            .unwrap();

        let patient = report.get(PATIENT_TABLE).unwrap();
        assert!(!patient.success);
        assert_eq!(patient.phase, TablePhase::Failed);
        let failure = patient.error.as_ref().unwrap();
        assert_eq!(failure.phase, TablePhase::Extracting);
        assert!(failure.is_kind(ErrorKind::FailpointFatal));
    }

    // The first page of two rows made it into the replica.
    let progress = tiers.replica.copy_progress(PATIENT_TABLE).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Failed);
    assert_eq!(progress.rows_copied, 2);
    assert_eq!(
        progress.last_primary_value.as_deref(),
        Some("2024-01-02 00:00:00")
    );
    assert_eq!(tiers.replica.table_rows(PATIENT_TABLE).await.len(), 2);

    // The rerun copies from the watermark inclusively and loads everything.
    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
        .run()
        .await
        .unwrap();

    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(
        patient.extraction_strategy,
        Some(ExtractionStrategy::Incremental)
    );
    assert_eq!(patient.rows_extracted, 2);
    assert_eq!(patient.rows_loaded, 3);
    assert_eq!(tiers.replica.table_rows(PATIENT_TABLE).await, patient_rows());

    let progress = tiers.replica.copy_progress(PATIENT_TABLE).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Success);
    assert_eq!(
        progress.last_primary_value.as_deref(),
        Some("2024-01-03 00:00:00")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_statement_failures_are_absorbed_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    let _scenario = SyncFailScenario::setup(&[(SESSION_BEFORE_STATEMENT, "2*return(transient)")]);

    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
        .run()
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.get(PATIENT_TABLE).unwrap().rows_loaded, 3);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_load_is_recovered_by_the_next_run_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;

    {
        let _scenario = SyncFailScenario::setup(&[(LOAD_AFTER_ENSURE_TABLE, "return")]);

        let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
            .run()
            .await
            .unwrap();

        let patient = report.get(PATIENT_TABLE).unwrap();
        assert!(!patient.success);
        assert_eq!(patient.rows_extracted, 3);
        let failure = patient.error.as_ref().unwrap();
        assert_eq!(failure.phase, TablePhase::Loading);
        assert!(failure.is_kind(ErrorKind::FailpointFatal));
    }

    // The warehouse table exists but is empty.
    assert!(tiers.warehouse_rows(PATIENT_TABLE).await.is_empty());

    // Nothing new in the source, but the empty warehouse is loaded from the replica in full.
    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![patient_spec()])
        .run()
        .await
        .unwrap();

    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.rows_extracted, 0);
    assert_eq!(patient.rows_loaded, 3);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 3);

    let load = tiers
        .warehouse
        .load_progress(PATIENT_TABLE)
        .await
        .unwrap();
    assert_eq!(load.status, LoadStatus::Success);
}

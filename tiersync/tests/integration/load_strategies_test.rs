use tiersync::config::{EngineConfig, LoadConfig};
use tiersync::load::LoadStrategy;
use tiersync::test_utils::fixtures::{
    MemoryTiers, PATIENT_TABLE, numbered_rows, numbered_schema, patient_row, patient_rows,
    patient_schema, patient_spec, test_config, timestamp,
};
use tiersync::types::TableRow;
use tiersync::workers::priority::Orchestrator;
use tiersync_config::shared::TableSpec;
use tiersync_telemetry::tracing::init_test_tracing;

const TABLE: &str = "events";
const ROWS: i64 = 11;

/// Settings under which every window above `standard_max_rows = 0` picks `strategy`.
fn config_for(strategy: LoadStrategy) -> EngineConfig {
    let mut config = test_config();
    config.load = LoadConfig {
        standard_max_rows: 0,
        chunked_max_rows: 0,
        streaming_max_rows: 0,
        bulk_file_min_size_mb: f64::MAX,
        chunk_size: 3,
        parallel_workers: 3,
        ..LoadConfig::default()
    };

    match strategy {
        LoadStrategy::Standard => config.load.standard_max_rows = u64::MAX,
        LoadStrategy::Chunked => config.load.chunked_max_rows = u64::MAX,
        LoadStrategy::Streaming => config.load.streaming_max_rows = u64::MAX,
        LoadStrategy::Parallel => {}
        LoadStrategy::BulkFile => config.load.bulk_file_min_size_mb = 0.0,
    }

    config
}

async fn load_with(strategy: LoadStrategy) -> (MemoryTiers, Vec<TableRow>) {
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(numbered_schema(TABLE), numbered_rows(ROWS))
        .await;

    let report = Orchestrator::new(
        tiers.tiers(),
        config_for(strategy),
        vec![TableSpec::full(TABLE)],
    )
    .run()
    .await
    .unwrap();

    let result = report.get(TABLE).unwrap();
    assert!(result.success, "{strategy} load failed: {:?}", result.error);
    assert_eq!(result.load_strategy, Some(strategy));
    assert_eq!(result.rows_loaded, ROWS as u64);
    assert!(!result.verification_mismatch);

    let rows = tiers.warehouse_rows(TABLE).await;
    (tiers, rows)
}

#[tokio::test(flavor = "multi_thread")]
async fn every_strategy_loads_the_same_rows_test() {
    init_test_tracing();

    for strategy in [
        LoadStrategy::Standard,
        LoadStrategy::Chunked,
        LoadStrategy::Streaming,
        LoadStrategy::Parallel,
        LoadStrategy::BulkFile,
    ] {
        let (_, rows) = load_with(strategy).await;
        assert_eq!(rows, numbered_rows(ROWS), "{strategy} loaded different rows");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_file_load_removes_its_staging_file_test() {
    init_test_tracing();
    let staging = std::env::temp_dir().join(format!("tiersync-test-{}", std::process::id()));

    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(numbered_schema(TABLE), numbered_rows(ROWS))
        .await;
    let mut config = config_for(LoadStrategy::BulkFile);
    config.load.staging_dir = Some(staging.clone());

    let report = Orchestrator::new(tiers.tiers(), config, vec![TableSpec::full(TABLE)])
        .run()
        .await
        .unwrap();

    assert!(report.is_success());
    let mut entries = tokio::fs::read_dir(&staging).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
    tokio::fs::remove_dir(&staging).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_windows_use_the_chunked_strategy_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(patient_schema(), patient_rows())
        .await;
    let config = config_for(LoadStrategy::Chunked);

    Orchestrator::new(tiers.tiers(), config.clone(), vec![patient_spec()])
        .run()
        .await
        .unwrap();

    let new_rows: Vec<_> = (4..=8)
        .map(|id| patient_row(id, "New", 1, timestamp(2024, 2, id as u32)))
        .collect();
    tiers.source.insert_rows(PATIENT_TABLE, new_rows).await;

    let report = Orchestrator::new(tiers.tiers(), config, vec![patient_spec()])
        .run()
        .await
        .unwrap();

    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.load_strategy, Some(LoadStrategy::Chunked));
    assert_eq!(patient.rows_extracted, 5);
    assert_eq!(patient.rows_loaded, 5);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_stream_resumes_without_counting_rows_twice_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(numbered_schema(TABLE), numbered_rows(ROWS))
        .await;
    tiers.replica.fail_next_stream_after(7).await;

    let report = Orchestrator::new(
        tiers.tiers(),
        config_for(LoadStrategy::Streaming),
        vec![TableSpec::full(TABLE)],
    )
    .run()
    .await
    .unwrap();

    let result = report.get(TABLE).unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.load_strategy, Some(LoadStrategy::Streaming));
    assert_eq!(result.rows_loaded, ROWS as u64);
    assert!(!result.verification_mismatch);
    assert_eq!(tiers.warehouse_rows(TABLE).await, numbered_rows(ROWS));
}

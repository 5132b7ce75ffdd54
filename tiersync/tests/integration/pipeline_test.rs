use tiersync::config::EngineConfig;
use tiersync::error::ErrorKind;
use tiersync::extract::FullRefreshReason;
use tiersync::report::{RunReport, TablePhase};
use tiersync::state::{CopyStatus, LoadStatus};
use tiersync::test_utils::fixtures::{
    MemoryTiers, PATIENT_TABLE, TEST_WAREHOUSE_SCHEMA, column, numbered_rows, numbered_schema,
    patient_row, patient_rows, patient_schema, patient_spec, test_config, timestamp,
};
use tiersync::types::{Cell, TableRow, TableSchema, TargetColumn, TargetSchema, WarehouseType};
use tiersync::workers::priority::Orchestrator;
use tiersync_config::shared::{ExtractionStrategy, RetryTierConfig, TableSpec};
use tiersync_telemetry::metrics::init_metrics_handle;
use tiersync_telemetry::tracing::init_test_tracing;

async fn run(tiers: &MemoryTiers, config: EngineConfig, specs: Vec<TableSpec>) -> RunReport {
    Orchestrator::new(tiers.tiers(), config, specs)
        .run()
        .await
        .unwrap()
}

async fn seeded_patient_tiers() -> MemoryTiers {
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(patient_schema(), patient_rows())
        .await;
    tiers
}

#[tokio::test(flavor = "multi_thread")]
async fn patient_table_is_copied_then_loaded_incrementally_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;

    // First run copies and loads everything.
    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    assert!(report.is_success());
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert_eq!(patient.phase, TablePhase::Done);
    assert_eq!(patient.rows_extracted, 3);
    assert_eq!(patient.rows_loaded, 3);
    assert_eq!(patient.extraction_strategy, Some(ExtractionStrategy::Full));
    assert_eq!(patient.full_refresh_reason, Some(FullRefreshReason::FirstRun));
    assert!(!patient.verification_mismatch);

    let progress = tiers.replica.copy_progress(PATIENT_TABLE).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Success);
    assert_eq!(progress.primary_column_name.as_deref(), Some("DateModified"));
    assert_eq!(
        progress.last_primary_value.as_deref(),
        Some("2024-01-03 00:00:00")
    );

    // Nothing changed: nothing is copied or loaded.
    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.rows_extracted, 0);
    assert_eq!(patient.rows_loaded, 0);
    assert_eq!(
        patient.extraction_strategy,
        Some(ExtractionStrategy::Incremental)
    );
    assert_eq!(patient.full_refresh_reason, None);
    assert!(!patient.stale_state_recovered);

    // One new row moves through both tiers and advances the watermark.
    tiers
        .source
        .insert_rows(
            PATIENT_TABLE,
            vec![patient_row(4, "Barbara", 0, timestamp(2024, 1, 4))],
        )
        .await;
    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.rows_extracted, 1);
    assert_eq!(patient.rows_loaded, 1);

    let progress = tiers.replica.copy_progress(PATIENT_TABLE).await.unwrap();
    assert_eq!(
        progress.last_primary_value.as_deref(),
        Some("2024-01-04 00:00:00")
    );
    assert_eq!(tiers.replica.table_rows(PATIENT_TABLE).await.len(), 4);

    let rows = tiers.warehouse_rows(PATIENT_TABLE).await;
    assert_eq!(rows.len(), 4);
    assert_eq!(
        rows[0],
        TableRow::new(vec![
            Cell::I64(1),
            Cell::String("Ada".to_string()),
            Cell::Bool(true),
            Cell::DateTime(timestamp(2024, 1, 1)),
        ])
    );
    assert_eq!(
        rows[3],
        TableRow::new(vec![
            Cell::I64(4),
            Cell::String("Barbara".to_string()),
            Cell::Bool(false),
            Cell::DateTime(timestamp(2024, 1, 4)),
        ])
    );

    let load = tiers
        .warehouse
        .load_progress(PATIENT_TABLE)
        .await
        .unwrap();
    assert_eq!(load.status, LoadStatus::Success);
    assert_eq!(load.rows_loaded, 1);
    assert_eq!(load.load_strategy.as_deref(), Some("standard"));
    assert!(load.created_at.is_some());
    assert!(load.last_loaded_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn updated_rows_replace_their_previous_version_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    run(&tiers, test_config(), vec![patient_spec()]).await;

    tiers
        .source
        .insert_rows(
            PATIENT_TABLE,
            vec![patient_row(2, "Grace Hopper", 1, timestamp(2024, 2, 1))],
        )
        .await;
    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert_eq!(patient.rows_extracted, 1);
    assert_eq!(patient.rows_loaded, 1);

    let rows = tiers.warehouse_rows(PATIENT_TABLE).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].values[1], Cell::String("Grace Hopper".to_string()));
    assert_eq!(rows[1].values[2], Cell::Bool(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn full_tables_are_reloaded_identically_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(numbered_schema("lookup"), numbered_rows(5))
        .await;
    let spec = TableSpec::full("lookup");

    let first = run(&tiers, test_config(), vec![spec.clone()]).await;
    let after_first = tiers.warehouse_rows("lookup").await;
    let second = run(&tiers, test_config(), vec![spec]).await;
    let after_second = tiers.warehouse_rows("lookup").await;

    for report in [&first, &second] {
        let lookup = report.get("lookup").unwrap();
        assert!(lookup.success);
        assert_eq!(lookup.rows_extracted, 5);
        assert_eq!(lookup.rows_loaded, 5);
        assert_eq!(lookup.extraction_strategy, Some(ExtractionStrategy::Full));
        assert_eq!(lookup.full_refresh_reason, None);
    }
    assert_eq!(after_first.len(), 5);
    assert_eq!(after_first, after_second);

    let progress = tiers.replica.copy_progress("lookup").await.unwrap();
    assert_eq!(progress.last_primary_value, None);
    assert_eq!(progress.rows_copied, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn warehouse_behind_the_replica_is_reloaded_in_full_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    run(&tiers, test_config(), vec![patient_spec()]).await;

    // Rows lost downstream without moving the warehouse maximum.
    tiers
        .warehouse
        .retain_warehouse_rows(TEST_WAREHOUSE_SCHEMA, PATIENT_TABLE, |row| {
            row.values[0] != Cell::I64(1)
        })
        .await;
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 2);

    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.rows_extracted, 0);
    assert!(patient.stale_state_recovered);
    assert_eq!(patient.rows_loaded, 3);
    assert!(!patient.verification_mismatch);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 3);
    assert_eq!(report.stale_recovery_rate(), 1.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_full_refresh_recopies_incremental_tables_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    run(&tiers, test_config(), vec![patient_spec()]).await;

    let mut config = test_config();
    config.pipeline.force_full_refresh = true;
    let report = run(&tiers, config, vec![patient_spec()]).await;

    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.rows_extracted, 3);
    assert_eq!(patient.rows_loaded, 3);
    assert_eq!(patient.full_refresh_reason, Some(FullRefreshReason::Forced));
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn one_incompatible_table_does_not_stop_the_others_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    let names: Vec<String> = (1..=10).map(|index| format!("table_{index:02}")).collect();
    for name in &names {
        tiers
            .source
            .create_table(numbered_schema(name), numbered_rows(4))
            .await;
    }

    // A pre-existing warehouse table whose key column is too narrow.
    tiers
        .warehouse
        .create_warehouse_table(TargetSchema {
            schema: TEST_WAREHOUSE_SCHEMA.to_string(),
            name: "table_05".to_string(),
            columns: vec![
                TargetColumn {
                    name: "Id".to_string(),
                    data_type: WarehouseType::Boolean,
                    nullable: false,
                },
                TargetColumn {
                    name: "Label".to_string(),
                    data_type: WarehouseType::Text,
                    nullable: true,
                },
            ],
            primary_key: vec!["Id".to_string()],
        })
        .await;

    let specs = names.iter().map(TableSpec::full).collect();
    let report = run(&tiers, test_config(), specs).await;

    assert!(!report.is_success());
    assert_eq!(report.tables.len(), 10);
    assert_eq!(report.successes().count(), 9);
    assert_eq!(report.failures().count(), 1);
    assert_eq!(report.total_rows_loaded(), 36);

    let failed = report.get("table_05").unwrap();
    assert_eq!(failed.phase, TablePhase::Failed);
    let error = failed.error.as_ref().unwrap();
    assert_eq!(error.phase, TablePhase::Loading);
    assert!(error.is_kind(ErrorKind::SchemaIncompatibility));
    assert!(
        tiers
            .warehouse_rows("table_05")
            .await
            .is_empty()
    );

    for name in names.iter().filter(|name| *name != "table_05") {
        assert_eq!(tiers.warehouse_rows(name).await.len(), 4);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_source_table_fails_during_extraction_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;

    let report = run(
        &tiers,
        test_config(),
        vec![patient_spec(), TableSpec::full("ghost")],
    )
    .await;

    assert!(report.get(PATIENT_TABLE).unwrap().success);
    let ghost = report.get("ghost").unwrap();
    assert!(!ghost.success);
    let error = ghost.error.as_ref().unwrap();
    assert_eq!(error.phase, TablePhase::Extracting);
    assert!(error.is_kind(ErrorKind::SourceSchemaError));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_table_settings_fail_only_that_table_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    let invalid = TableSpec::incremental("broken", Vec::<String>::new());

    let report = run(&tiers, test_config(), vec![patient_spec(), invalid]).await;

    assert!(report.get(PATIENT_TABLE).unwrap().success);
    let broken = report.get("broken").unwrap();
    assert!(
        broken
            .error
            .as_ref()
            .unwrap()
            .is_kind(ErrorKind::ValidationError)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_rejected_by_the_replica_are_skipped_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    let mut rows = numbered_rows(3);
    rows.push(TableRow::new(vec![Cell::I64(4)]));
    tiers
        .source
        .create_table(numbered_schema("dirty"), rows)
        .await;

    let report = run(&tiers, test_config(), vec![TableSpec::full("dirty")]).await;

    let dirty = report.get("dirty").unwrap();
    assert!(dirty.success);
    assert_eq!(dirty.rows_extracted, 3);
    assert_eq!(dirty.rows_loaded, 3);
    assert_eq!(tiers.replica.table_rows("dirty").await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_start_cancels_every_table_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    let orchestrator = Orchestrator::new(
        tiers.tiers(),
        test_config(),
        vec![patient_spec(), TableSpec::full("other")],
    );
    orchestrator.shutdown_tx().shutdown();

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.failures().count(), 2);
    for result in report.tables.values() {
        assert!(
            result
                .error
                .as_ref()
                .unwrap()
                .is_kind(ErrorKind::Cancelled)
        );
    }
    assert!(tiers.replica.copy_progress(PATIENT_TABLE).await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn run_records_row_metrics_test() {
    init_test_tracing();
    let handle = init_metrics_handle().unwrap();
    let tiers = seeded_patient_tiers().await;

    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    assert!(report.is_success());

    let rendered = handle.render();
    assert!(rendered.contains("tiersync_rows_extracted_total"));
    assert!(rendered.contains("tiersync_rows_loaded_total"));
    assert!(rendered.contains("tiersync_table_runs_total"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_without_an_incremental_value_are_paged_past_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    let undated: Vec<_> = (4..=6)
        .map(|id| {
            TableRow::new(vec![
                Cell::I64(id),
                Cell::String("Legacy".to_string()),
                Cell::I64(0),
                Cell::Null,
            ])
        })
        .collect();
    tiers.source.insert_rows(PATIENT_TABLE, undated).await;

    // Pages of two end on (NULL, 5), then on (NULL, 6) next to a dated row.
    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success, "{:?}", patient.error);
    assert_eq!(patient.rows_extracted, 6);
    assert_eq!(patient.rows_loaded, 6);
    assert!(!patient.verification_mismatch);
    assert_eq!(tiers.replica.table_rows(PATIENT_TABLE).await.len(), 6);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 6);

    let progress = tiers.replica.copy_progress(PATIENT_TABLE).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Success);
    assert_eq!(progress.rows_copied, 6);
    assert_eq!(
        progress.last_primary_value.as_deref(),
        Some("2024-01-03 00:00:00")
    );

    tiers
        .source
        .insert_rows(
            PATIENT_TABLE,
            vec![patient_row(7, "Barbara", 1, timestamp(2024, 1, 4))],
        )
        .await;
    let report = run(&tiers, test_config(), vec![patient_spec()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(patient.success);
    assert_eq!(patient.rows_extracted, 1);
    assert_eq!(patient.rows_loaded, 1);
    assert!(!patient.stale_state_recovered);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn keyless_tables_with_nulls_are_copied_across_pages_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    let schema = TableSchema::from_definitions(
        "notes",
        vec![
            column("Body", "varchar", "varchar(32)", None),
            column("Score", "int", "int(11)", None),
        ],
        None,
    );
    let note = |body: Option<&str>, score: Option<i64>| {
        TableRow::new(vec![
            body.map_or(Cell::Null, |body| Cell::String(body.to_string())),
            score.map_or(Cell::Null, Cell::I64),
        ])
    };
    let rows = vec![
        note(None, None),
        note(Some("a"), None),
        note(None, Some(1)),
        note(Some("a"), Some(1)),
        note(Some("b"), Some(2)),
    ];
    tiers.source.create_table(schema, rows).await;

    let report = run(&tiers, test_config(), vec![TableSpec::full("notes")]).await;
    let notes = report.get("notes").unwrap();
    assert!(notes.success, "{:?}", notes.error);
    assert_eq!(notes.rows_extracted, 5);
    assert_eq!(notes.rows_loaded, 5);
    assert!(!notes.verification_mismatch);
    assert_eq!(tiers.replica.table_rows("notes").await.len(), 5);
    assert_eq!(tiers.warehouse_rows("notes").await.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_extract_keeps_its_progress_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    let rows: Vec<_> = (1..=40)
        .map(|id| {
            let modified = timestamp(2024, 1, 1) + chrono::Duration::hours(id);
            patient_row(id, "Patient", 1, modified)
        })
        .collect();
    tiers.source.create_table(patient_schema(), rows).await;

    let mut config = test_config();
    let throttled = RetryTierConfig::new(3, 1, 5, 20);
    config.resilience.tiny = throttled.clone();
    config.resilience.small = throttled.clone();
    config.resilience.medium = throttled.clone();
    config.resilience.large = throttled;
    config.pipeline.extract_timeout_ms = 250;
    config.pipeline.poor_throughput_ratio = 0.0;
    let spec = TableSpec::incremental(PATIENT_TABLE, ["DateModified"]);

    let report = run(&tiers, config.clone(), vec![spec.clone()]).await;
    let patient = report.get(PATIENT_TABLE).unwrap();
    assert!(!patient.success);
    assert!(patient.error.as_ref().unwrap().is_kind(ErrorKind::Timeout));

    let copied = tiers.replica.table_rows(PATIENT_TABLE).await.len() as u64;
    assert!(copied > 0 && copied < 40, "copied {copied} rows");
    let progress = tiers.replica.copy_progress(PATIENT_TABLE).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Failed);
    assert_eq!(progress.rows_copied, copied);
    assert!(progress.last_primary_value.is_some());

    // Each run resumes from the stored watermark, so the copy finishes.
    let mut runs = 1;
    loop {
        let report = run(&tiers, config.clone(), vec![spec.clone()]).await;
        runs += 1;
        if report.is_success() {
            break;
        }
        assert!(runs < 20, "copy did not finish after {runs} runs");
    }
    assert_eq!(tiers.replica.table_rows(PATIENT_TABLE).await.len(), 40);
    assert_eq!(tiers.warehouse_rows(PATIENT_TABLE).await.len(), 40);
}

#[tokio::test(flavor = "multi_thread")]
async fn warehouse_catches_up_while_new_rows_keep_arriving_test() {
    init_test_tracing();
    let tiers = seeded_patient_tiers().await;
    run(&tiers, test_config(), vec![patient_spec()]).await;

    // An interrupted load left a gap below the warehouse maximum.
    tiers
        .warehouse
        .retain_warehouse_rows(TEST_WAREHOUSE_SCHEMA, PATIENT_TABLE, |row| {
            row.values[0] != Cell::I64(1)
        })
        .await;

    for id in 4..=6 {
        tiers
            .source
            .insert_rows(
                PATIENT_TABLE,
                vec![patient_row(id, "Nightly", 1, timestamp(2024, 1, id as u32))],
            )
            .await;

        let report = run(&tiers, test_config(), vec![patient_spec()]).await;
        let patient = report.get(PATIENT_TABLE).unwrap();
        assert!(patient.success);
        assert_eq!(patient.rows_extracted, 1);
        assert_eq!(patient.stale_state_recovered, id == 4);
        assert!(!patient.verification_mismatch);
        assert_eq!(
            tiers.warehouse_rows(PATIENT_TABLE).await.len(),
            tiers.replica.table_rows(PATIENT_TABLE).await.len()
        );
    }
}

use tiersync::test_utils::fixtures::{MemoryTiers, TEST_WAREHOUSE_SCHEMA, column, test_config};
use tiersync::types::{Cell, TableRow, TableSchema, WarehouseType};
use tiersync::workers::priority::Orchestrator;
use tiersync_config::shared::TableSpec;
use tiersync_telemetry::tracing::init_test_tracing;

fn flags_schema() -> TableSchema {
    TableSchema::from_definitions(
        "flags",
        vec![
            column("Id", "int", "int(11)", Some(1)),
            column("Binary", "tinyint", "tinyint(4)", None),
            column("Level", "tinyint", "tinyint(4)", None),
            column("Unset", "tinyint", "tinyint(1)", None),
            column("UnsetWide", "tinyint", "tinyint(4)", None),
        ],
        None,
    )
}

fn flags_row(id: i64, binary: i64, level: i64) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::I64(binary),
        Cell::I64(level),
        Cell::Null,
        Cell::Null,
    ])
}

#[tokio::test(flavor = "multi_thread")]
async fn single_byte_integers_become_booleans_only_when_observed_as_such_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(
            flags_schema(),
            vec![flags_row(1, 0, 0), flags_row(2, 1, 1), flags_row(3, 1, 2)],
        )
        .await;

    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![TableSpec::full("flags")])
        .run()
        .await
        .unwrap();
    assert!(report.is_success());

    let columns = tiers
        .warehouse
        .warehouse_columns(TEST_WAREHOUSE_SCHEMA, "flags")
        .await
        .unwrap();
    let types: Vec<_> = columns
        .iter()
        .map(|column| (column.name.as_str(), column.data_type.clone()))
        .collect();
    assert_eq!(
        types,
        vec![
            ("Id", WarehouseType::Integer),
            ("Binary", WarehouseType::Boolean),
            ("Level", WarehouseType::SmallInt),
            ("Unset", WarehouseType::Boolean),
            ("UnsetWide", WarehouseType::Boolean),
        ]
    );

    let rows = tiers.warehouse_rows("flags").await;
    assert_eq!(
        rows[2],
        TableRow::new(vec![
            Cell::I64(3),
            Cell::Bool(true),
            Cell::I64(2),
            Cell::Null,
            Cell::Null,
        ])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_boolean_column_rejects_wider_values_test() {
    init_test_tracing();
    let tiers = MemoryTiers::new();
    tiers
        .source
        .create_table(flags_schema(), vec![flags_row(1, 0, 5)])
        .await;
    let spec = TableSpec::full("flags");

    Orchestrator::new(tiers.tiers(), test_config(), vec![spec.clone()])
        .run()
        .await
        .unwrap();

    // `Binary` now holds 7: the derived type narrows to smallint, which the existing boolean
    // column cannot hold.
    tiers
        .source
        .insert_rows("flags", vec![flags_row(1, 7, 5)])
        .await;
    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![spec.clone()])
        .run()
        .await
        .unwrap();
    assert!(!report.is_success());

    // Back to 0/1: the existing columns accept the derived types again.
    tiers
        .source
        .insert_rows("flags", vec![flags_row(1, 1, 5)])
        .await;
    let report = Orchestrator::new(tiers.tiers(), test_config(), vec![spec])
        .run()
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(
        tiers.warehouse_rows("flags").await,
        vec![TableRow::new(vec![
            Cell::I64(1),
            Cell::Bool(true),
            Cell::I64(5),
            Cell::Null,
            Cell::Null,
        ])]
    );
}

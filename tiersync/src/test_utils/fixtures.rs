use chrono::{NaiveDate, NaiveDateTime};
use tiersync_config::shared::{
    BatchConfig, LoadConfig, PipelineConfig, ResilienceConfig, RetryTierConfig, TableSpec,
};

use crate::config::EngineConfig;
use crate::database::DatabaseRole;
use crate::test_utils::memory::{MemoryConnector, MemoryDatabase};
use crate::types::{Cell, ColumnDefinition, MySqlType, TableRow, TableSchema};
use crate::workers::Tiers;

/// Warehouse schema used by [`test_config`].
pub const TEST_WAREHOUSE_SCHEMA: &str = "analytics";

pub const PATIENT_TABLE: &str = "patient";

/// The three tiers of a test run, each an independent [`MemoryDatabase`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTiers {
    pub source: MemoryDatabase,
    pub replica: MemoryDatabase,
    pub warehouse: MemoryDatabase,
}

impl MemoryTiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tiers(&self) -> Tiers<MemoryConnector, MemoryConnector, MemoryConnector> {
        Tiers::new(
            self.source.connector(DatabaseRole::Source),
            self.replica.connector(DatabaseRole::Replica),
            self.warehouse.connector(DatabaseRole::Warehouse),
        )
    }

    /// Rows of `table` in the test warehouse schema.
    pub async fn warehouse_rows(&self, table: &str) -> Vec<TableRow> {
        self.warehouse
            .warehouse_rows(TEST_WAREHOUSE_SCHEMA, table)
            .await
    }
}

/// Engine settings with fast retries and small extraction pages.
pub fn test_config() -> EngineConfig {
    let fast = RetryTierConfig::new(3, 1, 5, 0);

    EngineConfig {
        pipeline: PipelineConfig {
            warehouse_schema: TEST_WAREHOUSE_SCHEMA.to_string(),
            ..PipelineConfig::default()
        },
        resilience: ResilienceConfig {
            tiny: fast.clone(),
            small: fast.clone(),
            medium: fast.clone(),
            large: fast,
        },
        batch: BatchConfig {
            tiny_rows: 2,
            ..BatchConfig::default()
        },
        load: LoadConfig::default(),
    }
}

pub fn column(name: &str, data_type: &str, column_type: &str, key: Option<u32>) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        typ: MySqlType::parse(data_type, column_type),
        column_type: column_type.to_string(),
        nullable: key.is_none(),
        primary_key_position: key,
    }
}

pub fn timestamp(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("invalid date")
}

/// `patient (Id int pk, Name varchar(64), IsActive tinyint(4), DateModified datetime)`.
pub fn patient_schema() -> TableSchema {
    TableSchema::from_definitions(
        PATIENT_TABLE,
        vec![
            column("Id", "int", "int(11)", Some(1)),
            column("Name", "varchar", "varchar(64)", None),
            column("IsActive", "tinyint", "tinyint(4)", None),
            column("DateModified", "datetime", "datetime", None),
        ],
        None,
    )
}

pub fn patient_row(id: i64, name: &str, active: i64, modified: NaiveDateTime) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::String(name.to_string()),
        Cell::I64(active),
        Cell::DateTime(modified),
    ])
}

/// Three patients modified on the first three days of 2024.
pub fn patient_rows() -> Vec<TableRow> {
    vec![
        patient_row(1, "Ada", 1, timestamp(2024, 1, 1)),
        patient_row(2, "Grace", 0, timestamp(2024, 1, 2)),
        patient_row(3, "Linus", 1, timestamp(2024, 1, 3)),
    ]
}

pub fn patient_spec() -> TableSpec {
    TableSpec::incremental(PATIENT_TABLE, ["DateModified"]).with_estimates(3, 0.01)
}

/// `name (Id int pk, Label varchar(32))`.
pub fn numbered_schema(name: &str) -> TableSchema {
    TableSchema::from_definitions(
        name,
        vec![
            column("Id", "int", "int(11)", Some(1)),
            column("Label", "varchar", "varchar(32)", None),
        ],
        None,
    )
}

/// Rows `1..=count` of a [`numbered_schema`] table.
pub fn numbered_rows(count: i64) -> Vec<TableRow> {
    (1..=count)
        .map(|id| TableRow::new(vec![Cell::I64(id), Cell::String(format!("row {id}"))]))
        .collect()
}

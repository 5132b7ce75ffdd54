use std::collections::BTreeMap;

use serde::Deserialize;

use crate::Config;
use crate::shared::{
    BatchConfig, LoadConfig, MySqlConnectionConfig, PgConnectionConfig, PipelineConfig,
    ResilienceConfig, TableSettings, TableSpec, ValidationError,
};

/// Top-level configuration of the replicator binary.
///
/// Does not implement [`serde::Serialize`] since it carries database passwords.
#[derive(Clone, Debug, Deserialize)]
pub struct ReplicatorConfig {
    /// Production system of record.
    pub source: MySqlConnectionConfig,
    /// Local copy of the source, also holding `copy_progress`.
    pub replica: MySqlConnectionConfig,
    /// Analytics warehouse, also holding `load_progress`.
    pub warehouse: PgConnectionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSettings>,
    /// Address of the Prometheus exporter. Metrics are not exported when absent.
    #[serde(default)]
    pub metrics_bind: Option<String>,
}

impl ReplicatorConfig {
    /// Returns the table specifications in name order.
    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.tables
            .iter()
            .map(|(name, settings)| TableSpec::from_settings(name.clone(), settings.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate("source")?;
        self.replica.validate("replica")?;
        self.warehouse.validate()?;
        self.pipeline.validate()?;
        self.resilience.validate()?;
        self.batch.validate()?;
        self.load.validate()?;

        for spec in self.table_specs() {
            spec.validate()?;
        }

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

//! Configuration consumed by the engine.

// Re-exports.
pub use tiersync_config::shared::*;

/// Engine settings shared by every table of a run.
///
/// Connection parameters are not part of it: the engine only receives resolved connectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub resilience: ResilienceConfig,
    pub batch: BatchConfig,
    pub load: LoadConfig,
}

impl EngineConfig {
    pub fn from_replicator(config: &ReplicatorConfig) -> Self {
        Self {
            pipeline: config.pipeline.clone(),
            resilience: config.resilience.clone(),
            batch: config.batch.clone(),
            load: config.load.clone(),
        }
    }
}

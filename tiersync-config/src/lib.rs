//! Configuration types shared by every tiersync crate.
//!
//! The structures in [`shared`] describe the three database roles, the table specifications
//! produced by schema analysis and the knobs of the replication-and-load engine. They are
//! deserialized with `serde` and loaded from disk and environment variables via [`load_config`].

pub mod environment;
mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from};

//! Logging and metrics setup for the tiersync binaries and tests.

pub mod metrics;
pub mod tracing;

//! Replication-and-load engine moving tables from a production MySQL source into a MySQL
//! replica and from the replica into a PostgreSQL warehouse.
//!
//! The [`workers::priority::Orchestrator`] fans tables out over a bounded pool. Each table is
//! run by a [`workers::table::TableProcessor`], which copies it with the
//! [`extract::Extractor`] and then loads it with the [`load::Loader`]. Every statement goes
//! through a [`resilience::ResilientSession`].

pub mod concurrency;
pub mod config;
pub mod conversions;
pub mod database;
pub mod error;
pub mod extract;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod load;
mod macros;
pub mod metrics;
pub mod profile;
pub mod report;
pub mod resilience;
pub mod schema;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;

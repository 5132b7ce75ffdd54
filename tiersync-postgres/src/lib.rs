//! PostgreSQL helpers for the warehouse backend.
//!
//! Holds the warehouse column type model, the SQL text builders used for table creation,
//! upserts and bulk loads, and the embedded `load_progress` migrations.

#[cfg(feature = "sqlx")]
pub mod migrations;
pub mod schema;
pub mod types;

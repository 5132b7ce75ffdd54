//! MySQL helpers shared by the source and replica backends.
//!
//! Holds the column type model parsed from `information_schema`, the SQL text builders used by
//! the keyset reader and the upsert writer, and the embedded `copy_progress` migrations.

#[cfg(feature = "sqlx")]
pub mod migrations;
pub mod schema;
pub mod types;

//! Conversion of replica tables into warehouse tables.
//!
//! [`derive_schema`] maps replica column types onto warehouse types, [`ensure_table`] creates
//! or validates the warehouse table and [`RowConverter`] converts replica rows into values of
//! the warehouse column types.

mod convert;
mod converter;
mod target;

pub use convert::RowConverter;
pub use converter::{BOOLEAN_SAMPLE_LIMIT, derive_schema, is_boolean_sample, map_type};
pub use target::{EnsuredTable, ensure_table, reconcile};

//! Loading of replica tables into the warehouse.
//!
//! The [`Loader`] derives and ensures the warehouse table, selects the replica rows to load and
//! picks a [`LoadStrategy`] for them with [`select_strategy`]. Every strategy is a
//! [`LoadMethod`] and converts rows with the same [`RowConverter`](crate::schema::RowConverter).

mod bulk_file;
mod loader;
mod method;
mod paged;
mod parallel;
mod strategy;
mod streaming;
mod verify;

pub use bulk_file::BulkFileLoad;
pub use loader::{LoadOutcome, Loader};
pub use method::{LoadJob, LoadMethod};
pub use paged::{ChunkedLoad, StandardLoad};
pub use parallel::{ParallelLoad, partition_column};
pub use strategy::{LoadEstimate, LoadStrategy, select_strategy};
pub use streaming::StreamingLoad;
pub use verify::Verification;

//! Per-table progress records persisted in the replica (copy) and the warehouse (load).

pub mod copy_progress;
pub mod load_progress;

pub use copy_progress::*;
pub use load_progress::*;

//! Copying of source tables into the replica.
//!
//! [`plan_copy`] decides between a full and an incremental copy from the persisted
//! [`CopyProgress`](crate::state::CopyProgress), and the [`Extractor`] executes the plan.

mod extractor;
mod plan;

pub use extractor::{ExtractOutcome, Extractor};
pub use plan::{CopyPlan, FullRefreshReason, plan_copy, should_escalate};

//! Connection resilience: retries with exponential backoff, connection replacement and rate
//! limiting around every statement sent to any tier.

pub mod classify;
pub mod policy;
pub mod session;

pub use policy::RetryPolicy;
pub use session::{ResilientSession, SessionStats};

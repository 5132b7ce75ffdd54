//! Coordination primitives: cooperative shutdown and shutdown-aware batching of row streams.

pub mod shutdown;
pub mod stream;

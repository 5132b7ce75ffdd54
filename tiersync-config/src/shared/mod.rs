mod base;
mod batch;
mod connection;
mod loader;
mod pipeline;
mod replicator;
mod resilience;
mod table;

pub use base::*;
pub use batch::*;
pub use connection::*;
pub use loader::*;
pub use pipeline::*;
pub use replicator::*;
pub use resilience::*;
pub use table::*;

//! Table processing and its bounded fan-out over a worker pool.

pub mod pool;
pub mod priority;
pub mod table;

/// Connectors of the three tiers a run reads from and writes to.
#[derive(Clone)]
pub struct Tiers<S, R, W> {
    pub source: S,
    pub replica: R,
    pub warehouse: W,
}

impl<S, R, W> Tiers<S, R, W> {
    pub fn new(source: S, replica: R, warehouse: W) -> Self {
        Self {
            source,
            replica,
            warehouse,
        }
    }
}

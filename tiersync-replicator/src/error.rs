use std::error::Error;

use thiserror::Error;
use tiersync::error::SyncError;

/// Result type for replicator operations.
pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Error type of the replicator binary.
///
/// Per-table failures never end up here: they are part of the run report. These are the
/// failures that prevent a run from starting or its report from being written.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("configuration error: {0}")]
    Config(#[source] Box<dyn Error + Send + Sync>),

    #[error("table `{0}` is not configured")]
    UnknownTable(String),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::Error),

    #[error("{0}")]
    Engine(#[from] SyncError),

    #[error("failed to write the run report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplicatorError {
    /// Creates a configuration error from any error type.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err))
    }

    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Config(_) | ReplicatorError::UnknownTable(_) => {
                "configuration error"
            }
            ReplicatorError::Migration(_) => "migration error",
            ReplicatorError::Engine(_) => "engine error",
            ReplicatorError::Report(_) => "report error",
            ReplicatorError::Io(_) => "i/o error",
        }
    }

    /// Renders the error and its chain of causes for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("replicator failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = self.source();
        let mut index = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {index}: {err}\n"));
            source = err.source();
            index += 1;
        }

        if let ReplicatorError::Engine(err) = self {
            if let Some(backtrace) = err.backtrace() {
                if should_render_backtrace() {
                    out.push_str("backtrace:\n");
                    out.push_str(&backtrace.to_string());
                }
            }
        }

        out
    }
}

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiersync_config::shared::ValidationError;

    #[test]
    fn report_lists_the_cause_chain() {
        let err = ReplicatorError::config(ValidationError::MaxParallelTablesZero);
        let report = err.render_report();

        assert!(report.starts_with("replicator failed\ncategory: configuration error\n"));
        assert!(report.contains("error: configuration error: `pipeline.max_parallel_tables`"));
        assert!(report.contains("cause 1: `pipeline.max_parallel_tables` cannot be zero"));
    }
}

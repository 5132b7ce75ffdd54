use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Fires before every statement run through a resilient session.
pub const SESSION_BEFORE_STATEMENT: &str = "session.before_statement";

/// Fires after the extractor wrote a page into the replica.
pub const EXTRACT_AFTER_PAGE: &str = "extract.after_page";

/// Fires after the loader ensured the warehouse table.
pub const LOAD_AFTER_ENSURE_TABLE: &str = "load.after_ensure_table";

/// Returns an error when the failpoint `name` is configured to fire.
///
/// The `transient` parameter raises a retryable error, anything else a fatal one.
pub fn sync_fail_point(name: &str) -> SyncResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("transient") => ErrorKind::FailpointTransient,
            _ => ErrorKind::FailpointFatal,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}


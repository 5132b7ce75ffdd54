use serde::Serialize;

/// Row counts compared after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// Replica rows inside the loaded window.
    pub window_rows: u64,
    pub rows_written: u64,
    pub replica_rows: u64,
    pub warehouse_rows: u64,
}

impl Verification {
    pub fn window_matches(&self) -> bool {
        self.window_rows == self.rows_written
    }

    pub fn totals_match(&self) -> bool {
        self.replica_rows == self.warehouse_rows
    }

    pub fn is_consistent(&self) -> bool {
        self.window_matches() && self.totals_match()
    }

    /// Describes every disagreeing count, for logging.
    pub fn mismatches(&self) -> Vec<String> {
        let mut mismatches = Vec::new();
        if !self.window_matches() {
            mismatches.push(format!(
                "window has {} replica rows but {} were written",
                self.window_rows, self.rows_written
            ));
        }
        if !self.totals_match() {
            mismatches.push(format!(
                "replica has {} rows but the warehouse has {}",
                self.replica_rows, self.warehouse_rows
            ));
        }
        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_each_disagreement() {
        let verification = Verification {
            window_rows: 3,
            rows_written: 2,
            replica_rows: 10,
            warehouse_rows: 9,
        };
        assert!(!verification.is_consistent());
        assert_eq!(verification.mismatches().len(), 2);

        let clean = Verification {
            rows_written: 3,
            warehouse_rows: 10,
            ..verification
        };
        assert!(clean.is_consistent());
        assert!(clean.mismatches().is_empty());
    }
}

use fail::FailScenario;

/// Configures failpoints for the lifetime of the value and turns them off when dropped.
pub struct SyncFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> SyncFailScenario<'a> {
    pub fn setup(failpoints: &[(&str, &str)]) -> SyncFailScenario<'a> {
        let scenario = FailScenario::setup();
        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints
                .iter()
                .map(|(failpoint, _)| failpoint.to_string())
                .collect(),
        }
    }
}

impl Drop for SyncFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}

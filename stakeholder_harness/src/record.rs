//! Per-test execution records.
//!
//! The test log is what a weblog generator consumes: for every test the
//! dataset, the task calls that were executed, the report text and the
//! images it produced.

use crate::params::ParamRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub dataset: String,
    #[serde(rename = "taskcall")]
    pub task_calls: Vec<ParamRecord>,
    pub report: String,
    /// Products the existence checks found, for tests that run them
    pub images: Vec<String>,
    pub parallel: bool,
    /// Wall time of the test in seconds
    pub runtime: f64,
}

impl TestRecord {
    pub fn new(dataset: impl Into<String>, parallel: bool) -> Self {
        Self {
            dataset: dataset.into(),
            parallel,
            ..Default::default()
        }
    }

    /// Keep only the calls that actually ran in this mode.
    ///
    /// Cube tests record three calls where the second only runs in serial
    /// mode and the third only in parallel mode. Any other count is left as is.
    pub fn prune_task_calls(&mut self, parallel: bool) {
        if self.task_calls.len() == 3 {
            if parallel {
                self.task_calls.pop();
            } else {
                self.task_calls.remove(1);
            }
        }
        self.parallel = parallel;
    }
}

/// All test records of a run, keyed by test name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestLog {
    tests: BTreeMap<String, TestRecord>,
}

impl TestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, record: TestRecord) {
        self.tests.insert(name.into(), record);
    }

    pub fn get(&self, name: &str) -> Option<&TestRecord> {
        self.tests.get(name)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Save as JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamValue, TcleanOverrides, TcleanParams};
    use tempfile::TempDir;

    fn three_calls() -> TestRecord {
        let mut record = TestRecord::new("E2E6.1.00034.S_tclean.ms", false);
        for niter in [0, 1, 2] {
            record.task_calls.push(
                TcleanParams::default()
                    .merged(&TcleanOverrides::default().niter(niter))
                    .to_record(),
            );
        }
        record
    }

    fn niters(record: &TestRecord) -> Vec<ParamValue> {
        record.task_calls.iter().map(|c| c["niter"].clone()).collect()
    }

    #[test]
    fn test_prune_serial_drops_second_call() {
        let mut record = three_calls();
        record.prune_task_calls(false);
        assert_eq!(niters(&record), vec![ParamValue::Int(0), ParamValue::Int(2)]);
        assert!(!record.parallel);
    }

    #[test]
    fn test_prune_parallel_drops_last_call() {
        let mut record = three_calls();
        record.prune_task_calls(true);
        assert_eq!(niters(&record), vec![ParamValue::Int(0), ParamValue::Int(1)]);
        assert!(record.parallel);
    }

    #[test]
    fn test_prune_leaves_other_counts() {
        let mut record = three_calls();
        record.task_calls.pop();
        record.prune_task_calls(true);
        assert_eq!(record.task_calls.len(), 2);
    }

    #[test]
    fn test_log_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_log.json");
        let mut log = TestLog::new();
        let mut record = three_calls();
        record.report = "[ t ] x is 1 ( PASS : should be 1)\n".to_string();
        log.insert("test_standard_cube_briggsbwtaper", record);
        log.save_to_file(&path).unwrap();

        let loaded = TestLog::load_from_file(&path).unwrap();
        assert_eq!(loaded, log);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"taskcall\""));
    }
}

//! Result aggregation and the report feed
//!
//! Recording is idempotent keyed by (unit id, attempt count); only a
//! fresh insert fans out to the attached report sinks, so replaying a
//! result cannot duplicate feed entries.

use gridrunner_common::{ResultFilter, ResultStore, ResultSummary, TestResult};
use gridrunner_common::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives each freshly recorded result
pub trait ReportSink: Send + Sync {
    fn emit(&self, result: &TestResult) -> Result<()>;
}

/// Appends one JSON object per result to a feed file
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonlSink {
    fn emit(&self, result: &TestResult) -> Result<()> {
        let line = serde_json::to_string(result)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Append-only result collection over the store plus sink fan-out
#[derive(Clone)]
pub struct ResultAggregator {
    store: ResultStore,
    sinks: Arc<Mutex<Vec<Arc<dyn ReportSink>>>>,
}

impl ResultAggregator {
    pub fn new(store: ResultStore) -> Self {
        Self {
            store,
            sinks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attach a sink receiving every freshly recorded result
    pub fn attach(&self, sink: Arc<dyn ReportSink>) {
        self.sinks.lock().push(sink);
    }

    /// Record a result. Returns false when the same (unit, attempts)
    /// record already exists; duplicates are not re-emitted.
    ///
    /// A failing sink is logged and skipped; the stored record is
    /// already durable at that point.
    pub fn record(&self, result: &TestResult) -> Result<bool> {
        if !self.store.record(result)? {
            debug!("duplicate record for unit {} ignored", result.unit_id);
            return Ok(false);
        }

        let sinks = self.sinks.lock().clone();
        for sink in sinks {
            if let Err(error) = sink.emit(result) {
                warn!("report sink failed for unit {}: {}", result.unit_id, error);
            }
        }
        Ok(true)
    }

    /// Latest recorded result for a unit
    pub fn get(&self, unit_id: &str) -> Result<Option<TestResult>> {
        self.store.get(unit_id)
    }

    /// Query recorded results
    pub fn query(&self, filter: &ResultFilter) -> Result<Vec<TestResult>> {
        self.store.query(filter)
    }

    /// Per-status counts over every recorded result
    pub fn summary(&self) -> Result<ResultSummary> {
        self.store.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrunner_common::{
        AttemptOutcome, BrowserFamily, Capability, ExecutionAttempt, TestStep, TestUnit,
    };

    fn passed_result(name: &str) -> TestResult {
        let unit = TestUnit::new(
            name,
            Capability::new(BrowserFamily::Chrome),
            vec![TestStep::Navigate {
                url: "/".to_string(),
            }],
        );
        TestResult::new(
            &unit,
            vec![ExecutionAttempt {
                unit_id: unit.id.clone(),
                number: 1,
                session_id: "session-1".to_string(),
                started_at: 0,
                finished_at: 25,
                outcome: AttemptOutcome::Passed,
                failure: None,
                artifacts: Vec::new(),
            }],
        )
    }

    fn feed_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[test]
    fn test_record_fans_out_to_feed_once() {
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("results.jsonl");

        let aggregator = ResultAggregator::new(ResultStore::open_memory().unwrap());
        aggregator
            .attach(Arc::new(JsonlSink::create(&feed).unwrap()));

        let result = passed_result("login");
        assert!(aggregator.record(&result).unwrap());
        assert!(!aggregator.record(&result).unwrap());

        let lines = feed_lines(&feed);
        assert_eq!(lines.len(), 1);

        let replayed: TestResult = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(replayed.unit_id, result.unit_id);
        assert_eq!(replayed.final_status(), AttemptOutcome::Passed);
    }

    #[test]
    fn test_multiple_sinks_each_receive_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.jsonl");
        let second = dir.path().join("second.jsonl");

        let aggregator = ResultAggregator::new(ResultStore::open_memory().unwrap());
        aggregator.attach(Arc::new(JsonlSink::create(&first).unwrap()));
        aggregator.attach(Arc::new(JsonlSink::create(&second).unwrap()));

        aggregator.record(&passed_result("login")).unwrap();

        assert_eq!(feed_lines(&first).len(), 1);
        assert_eq!(feed_lines(&second).len(), 1);
    }

    struct FailingSink;

    impl ReportSink for FailingSink {
        fn emit(&self, _result: &TestResult) -> Result<()> {
            Err(gridrunner_common::Error::Internal("sink down".to_string()))
        }
    }

    #[test]
    fn test_failing_sink_does_not_poison_recording() {
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("results.jsonl");

        let aggregator = ResultAggregator::new(ResultStore::open_memory().unwrap());
        aggregator.attach(Arc::new(FailingSink));
        aggregator.attach(Arc::new(JsonlSink::create(&feed).unwrap()));

        let result = passed_result("login");
        assert!(aggregator.record(&result).unwrap());

        // the store kept the row and the healthy sink still ran
        assert!(aggregator.get(&result.unit_id).unwrap().is_some());
        assert_eq!(feed_lines(&feed).len(), 1);
    }
}

//! SQLite store for recorded test results

use crate::types::{AttemptOutcome, TestResult};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Append-only result store keyed by (unit_id, attempts).
///
/// Recording the same key twice is a no-op, so re-running the aggregator
/// over an already persisted result cannot duplicate rows.
#[derive(Clone)]
pub struct ResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl ResultStore {
    /// Open or create the store at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;

        info!("Opened result store at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the store schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Results table; one row per (unit, attempt count)
            CREATE TABLE IF NOT EXISTS results (
                unit_id TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                name TEXT NOT NULL,
                capability TEXT NOT NULL,
                final_status TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                record TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (unit_id, attempts)
            );
            CREATE INDEX IF NOT EXISTS idx_results_capability ON results(capability);
            CREATE INDEX IF NOT EXISTS idx_results_status ON results(final_status);
            "#,
        )?;

        debug!("Result store schema initialized");
        Ok(())
    }

    /// Record a result. Returns false when a row with the same
    /// (unit_id, attempts) key already exists.
    pub fn record(&self, result: &TestResult) -> Result<bool> {
        if result.attempts.is_empty() {
            return Err(Error::Internal(format!(
                "result for unit {} has no attempts",
                result.unit_id
            )));
        }

        let conn = self.conn.lock();
        let record = serde_json::to_string(result)?;

        let rows = conn.execute(
            "INSERT OR IGNORE INTO results
             (unit_id, attempts, name, capability, final_status, retry_count, record, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.unit_id,
                result.attempts.len() as i64,
                result.name,
                result.capability.to_string(),
                result.final_status().to_string(),
                result.retry_count() as i64,
                record,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        if rows > 0 {
            debug!("Recorded result for unit {}", result.unit_id);
        }

        Ok(rows > 0)
    }

    /// Latest recorded result for a unit
    pub fn get(&self, unit_id: &str) -> Result<Option<TestResult>> {
        let conn = self.conn.lock();

        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM results WHERE unit_id = ?1 ORDER BY attempts DESC LIMIT 1",
                params![unit_id],
                |row| row.get(0),
            )
            .optional()?;

        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Query recorded results, newest first
    pub fn query(&self, filter: &ResultFilter) -> Result<Vec<TestResult>> {
        let conn = self.conn.lock();

        let mut sql = String::from("SELECT record FROM results");
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(unit_id) = &filter.unit_id {
            clauses.push("unit_id = ?");
            args.push(unit_id.clone());
        }
        if let Some(capability) = &filter.capability {
            clauses.push("capability = ?");
            args.push(capability.clone());
        }
        if let Some(status) = &filter.status {
            clauses.push("final_status = ?");
            args.push(status.to_string());
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY recorded_at DESC, unit_id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }

        Ok(results)
    }

    /// Per-status counts over every recorded result
    pub fn summary(&self) -> Result<ResultSummary> {
        let conn = self.conn.lock();

        let mut stmt =
            conn.prepare("SELECT final_status, COUNT(*) FROM results GROUP BY final_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut summary = ResultSummary::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            summary.total += count;
            match status.as_str() {
                "passed" => summary.passed = count,
                "failed" => summary.failed = count,
                "errored" => summary.errored = count,
                "timed_out" => summary.timed_out = count,
                other => debug!("ignoring unknown status {} in summary", other),
            }
        }

        Ok(summary)
    }
}

/// Filter for result queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub unit_id: Option<String>,
    /// Matches the display form of the required capability, e.g. `chrome/121`
    pub capability: Option<String>,
    pub status: Option<AttemptOutcome>,
}

/// Counts of recorded results per final status
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResultSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub timed_out: u64,
}

//! Results Commands

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use gridrunner_common::{Capability, ResultFilter, ResultStore, ResultSummary, TestResult};
use gridrunner_orchestrator::OrchestratorConfig;

use crate::output::{print_item, print_list, OutputFormat, TableDisplay};

/// Results arguments
#[derive(Args)]
pub struct ResultsArgs {
    /// Filter by unit id
    #[arg(long)]
    pub unit: Option<String>,

    /// Filter by capability, e.g. "chrome/121"
    #[arg(long)]
    pub capability: Option<String>,

    /// Filter by final status (passed, failed, errored, timed_out)
    #[arg(long)]
    pub status: Option<String>,

    /// Show aggregate counts instead of individual results
    #[arg(long)]
    pub summary: bool,
}

/// Recorded result row for display
#[derive(Serialize)]
pub struct ResultDisplay {
    pub unit_id: String,
    pub test: String,
    pub capability: String,
    pub status: String,
    pub attempts: usize,
    pub duration_ms: i64,
    pub completed: String,
}

impl From<TestResult> for ResultDisplay {
    fn from(result: TestResult) -> Self {
        Self {
            unit_id: result.unit_id.clone(),
            test: result.name.clone(),
            capability: result.capability.to_string(),
            status: result.final_status().to_string(),
            attempts: result.attempts.len(),
            duration_ms: result.duration_ms(),
            completed: format_timestamp(result.completed_at),
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "Unit ID",
            "Test",
            "Capability",
            "Status",
            "Attempts",
            "Duration",
            "Completed",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.unit_id.clone(),
            self.test.clone(),
            self.capability.clone(),
            self.status.clone(),
            self.attempts.to_string(),
            format!("{}ms", self.duration_ms),
            self.completed.clone(),
        ]
    }
}

impl TableDisplay for ResultSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Total", "Passed", "Failed", "Errored", "Timed Out"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.total.to_string(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.errored.to_string(),
            self.timed_out.to_string(),
        ]
    }
}

fn format_timestamp(epoch_s: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_s, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_s.to_string())
}

pub fn execute(args: ResultsArgs, config_path: &Path, format: OutputFormat) -> Result<()> {
    let config = OrchestratorConfig::load(config_path)?;
    let store = ResultStore::open(&config.results_db)?;

    if args.summary {
        let summary = store.summary()?;
        print_item(&summary, format);
        return Ok(());
    }

    let mut filter = ResultFilter {
        unit_id: args.unit.clone(),
        ..Default::default()
    };
    if let Some(raw) = &args.capability {
        let capability: Capability = raw.parse()?;
        filter.capability = Some(capability.to_string());
    }
    if let Some(raw) = &args.status {
        filter.status = Some(raw.parse()?);
    }

    let results = store.query(&filter)?;
    let displays: Vec<ResultDisplay> = results.into_iter().map(ResultDisplay::from).collect();
    print_list(&displays, format);

    Ok(())
}

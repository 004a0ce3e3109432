//! Run Commands

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use gridrunner_common::{
    AttemptOutcome, Capability, Error, SessionHandle, TestResult, TestUnit,
};
use gridrunner_orchestrator::runner::{SimulationRunner, SimulatorConfig};
use gridrunner_orchestrator::{ArtifactWorkspace, Orchestrator, OrchestratorConfig};

use crate::output::{
    print_error, print_list, print_success, print_warning, OutputFormat, TableDisplay,
};
use crate::suite;

/// Run arguments
#[derive(Args)]
pub struct RunArgs {
    /// Directory holding suite YAML files
    #[arg(long, default_value = "suites")]
    pub suites: PathBuf,

    /// Simulated session fleet, e.g. "chrome=2,firefox/121=1"
    #[arg(long)]
    pub sessions: Option<String>,

    /// Override the configured worker concurrency
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Simulated latency per step in milliseconds
    #[arg(long, default_value_t = 10)]
    pub step_latency_ms: u64,

    /// Probability (0.0 to 1.0) of injected transient failures per step
    #[arg(long, default_value_t = 0.0)]
    pub flake_rate: f32,
}

/// Per-unit row for the final report
#[derive(Serialize)]
pub struct RunDisplay {
    pub test: String,
    pub capability: String,
    pub status: String,
    pub attempts: String,
    pub duration: String,
    pub detail: String,
}

impl RunDisplay {
    fn from_result(result: &TestResult) -> Self {
        let detail = result
            .attempts
            .last()
            .and_then(|a| a.failure.as_ref())
            .map(|f| f.message.clone())
            .unwrap_or_default();
        Self {
            test: result.name.clone(),
            capability: result.capability.to_string(),
            status: result.final_status().to_string(),
            attempts: result.attempts.len().to_string(),
            duration: format!("{}ms", result.duration_ms()),
            detail,
        }
    }

    fn from_error(test: &str, capability: &str, error: &Error) -> Self {
        let status = match error {
            Error::Unavailable { .. } => "unavailable",
            Error::ShutDown => "shut down",
            Error::Validation { .. } => "rejected",
            _ => "error",
        };
        Self {
            test: test.to_string(),
            capability: capability.to_string(),
            status: status.to_string(),
            attempts: "0".to_string(),
            duration: "-".to_string(),
            detail: error.to_string(),
        }
    }
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Capability", "Status", "Attempts", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.test.clone(),
            self.capability.clone(),
            self.status.clone(),
            self.attempts.clone(),
            self.duration.clone(),
            self.detail.clone(),
        ]
    }
}

/// Parse a fleet spec like "chrome=2,firefox/121=1"; a bare capability
/// means one session
fn parse_fleet(raw: &str) -> Result<Vec<(Capability, usize)>> {
    let mut fleet = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (spec, count) = match entry.split_once('=') {
            Some((spec, count)) => {
                let count: usize = count
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid session count in '{}'", entry))?;
                (spec.trim(), count)
            }
            None => (entry, 1),
        };
        let capability: Capability = spec.parse()?;
        fleet.push((capability, count));
    }
    anyhow::ensure!(!fleet.is_empty(), "Session fleet spec is empty");
    Ok(fleet)
}

/// One session per worker for every capability the units ask for
fn default_fleet(units: &[TestUnit], per_capability: usize) -> Vec<(Capability, usize)> {
    let mut fleet: Vec<(Capability, usize)> = Vec::new();
    for unit in units {
        if !fleet.iter().any(|(cap, _)| *cap == unit.capability) {
            fleet.push((unit.capability.clone(), per_capability));
        }
    }
    fleet
}

fn summary_line(displays: &[RunDisplay]) -> String {
    let mut parts = Vec::new();
    for status in [
        "passed",
        "failed",
        "errored",
        "timed_out",
        "unavailable",
        "rejected",
        "shut down",
        "error",
    ] {
        let count = displays.iter().filter(|d| d.status == status).count();
        if count == 0 {
            continue;
        }
        let part = format!("{} {}", count, status);
        if status == "passed" {
            parts.push(part.green().to_string());
        } else {
            parts.push(part.red().to_string());
        }
    }
    parts.join(", ")
}

pub async fn execute(args: RunArgs, config_path: &Path, format: OutputFormat) -> Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.flake_rate),
        "--flake-rate must be between 0.0 and 1.0"
    );

    let mut config = OrchestratorConfig::load(config_path)?;
    if let Some(concurrency) = args.concurrency {
        anyhow::ensure!(concurrency > 0, "--concurrency must be positive");
        config.concurrency_limit = concurrency;
    }

    let files = suite::load_all(&args.suites)?;
    let suite_count = files.len();
    let mut units = Vec::new();
    for file in files {
        units.extend(file.into_units());
    }
    for unit in &units {
        unit.validate()?;
    }

    let fleet = match &args.sessions {
        Some(raw) => parse_fleet(raw)?,
        None => default_fleet(&units, config.concurrency_limit),
    };

    // a unit nothing in the fleet can serve will wait out the acquire timeout
    let mut starved: Vec<String> = Vec::new();
    for unit in &units {
        let served = fleet
            .iter()
            .any(|(cap, _)| cap.satisfies(&unit.capability));
        let label = unit.capability.to_string();
        if !served && !starved.contains(&label) {
            starved.push(label);
        }
    }
    for label in &starved {
        print_warning(&format!("No session in the fleet matches '{}'", label));
    }

    let runner = SimulationRunner::with_config(
        ArtifactWorkspace::new(config.artifact_dir.clone()),
        SimulatorConfig {
            step_latency_ms: args.step_latency_ms,
            flake_rate: args.flake_rate,
        },
    );
    let mut orchestrator = Orchestrator::new(config, Arc::new(runner))?;

    let mut session_total = 0;
    for (capability, count) in &fleet {
        for _ in 0..*count {
            session_total += 1;
            orchestrator.register_session(SessionHandle::new(
                capability.clone(),
                format!("sim://node-{}", session_total),
            ));
        }
    }
    debug!(
        "fleet ready: {} session(s) across {} capability group(s)",
        session_total,
        fleet.len()
    );

    orchestrator.start();

    println!(
        "Running {} test(s) from {} suite(s) on {} simulated session(s)\n",
        units.len(),
        suite_count,
        session_total
    );

    // keep labels around so failed submissions still render a row
    let labels: HashMap<String, (String, String)> = units
        .iter()
        .map(|u| (u.id.clone(), (u.name.clone(), u.capability.to_string())))
        .collect();

    let started = Instant::now();
    let outcomes = orchestrator.run_all(units).await;
    let elapsed = started.elapsed();
    orchestrator.shutdown().await;

    let mut displays = Vec::new();
    let mut passed = 0usize;
    for (unit_id, outcome) in &outcomes {
        match outcome {
            Ok(result) => {
                if result.final_status() == AttemptOutcome::Passed {
                    passed += 1;
                }
                displays.push(RunDisplay::from_result(result));
            }
            Err(error) => {
                let (test, capability) = labels
                    .get(unit_id)
                    .cloned()
                    .unwrap_or_else(|| (unit_id.clone(), "-".to_string()));
                displays.push(RunDisplay::from_error(&test, &capability, error));
            }
        }
    }
    print_list(&displays, format);

    let total = displays.len();
    println!();
    if passed == total {
        print_success(&format!(
            "All {} test(s) passed in {:.1}s",
            total,
            elapsed.as_secs_f64()
        ));
    } else {
        print_error(&format!(
            "Run finished in {:.1}s: {}",
            elapsed.as_secs_f64(),
            summary_line(&displays)
        ));
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrunner_common::{BrowserFamily, Platform, TestStep};

    #[test]
    fn test_parse_fleet_with_counts_and_pins() {
        let fleet = parse_fleet("chrome=2, firefox/121/linux=1, edge").unwrap();
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet[0].0.family, BrowserFamily::Chrome);
        assert_eq!(fleet[0].1, 2);
        assert_eq!(fleet[1].0.version.as_deref(), Some("121"));
        assert_eq!(fleet[1].0.platform, Some(Platform::Linux));
        assert_eq!(fleet[2].1, 1);
    }

    #[test]
    fn test_parse_fleet_rejects_bad_input() {
        assert!(parse_fleet("chrome=lots").is_err());
        assert!(parse_fleet("").is_err());
    }

    #[test]
    fn test_default_fleet_covers_distinct_capabilities() {
        let chrome = Capability::new(BrowserFamily::Chrome);
        let firefox = Capability::new(BrowserFamily::Firefox);
        let step = TestStep::Navigate {
            url: "/".to_string(),
        };
        let units = vec![
            TestUnit::new("a", chrome.clone(), vec![step.clone()]),
            TestUnit::new("b", chrome.clone(), vec![step.clone()]),
            TestUnit::new("c", firefox.clone(), vec![step]),
        ];
        let fleet = default_fleet(&units, 4);
        assert_eq!(fleet, vec![(chrome, 4), (firefox, 4)]);
    }
}

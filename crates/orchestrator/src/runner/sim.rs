//! Deterministic simulation backend
//!
//! Runs test units without a browser grid. Step targets carrying a
//! `sim:` marker produce scripted failures so retry and classification
//! paths can be exercised end to end; `flake_rate` injects random
//! transient failures on top.

use async_trait::async_trait;
use gridrunner_common::{SessionHandle, StepError, TestStep, TestUnit};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ExecutionRunner, RunnerReport};
use crate::artifacts::ArtifactWorkspace;

/// Tuning for the simulation runner
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Simulated latency per step
    pub step_latency_ms: u64,
    /// Probability (0.0..=1.0) of a random transient failure per step
    pub flake_rate: f32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            step_latency_ms: 10,
            flake_rate: 0.0,
        }
    }
}

// Scripted failure markers recognized in step targets
const MARKER_MISSING: &str = "sim:missing";
const MARKER_STALE: &str = "sim:stale";
const MARKER_SLOW: &str = "sim:slow";
const MARKER_BROKEN: &str = "sim:broken";
const MARKER_CRASH: &str = "sim:crash";

pub struct SimulationRunner {
    artifacts: ArtifactWorkspace,
    config: SimulatorConfig,
}

impl SimulationRunner {
    pub fn new(artifacts: ArtifactWorkspace) -> Self {
        Self::with_config(artifacts, SimulatorConfig::default())
    }

    pub fn with_config(artifacts: ArtifactWorkspace, config: SimulatorConfig) -> Self {
        Self { artifacts, config }
    }

    /// Failure scripted into the step target, if any
    fn scripted_failure(step: &TestStep) -> Option<StepError> {
        let target = step.target()?;
        if target.contains(MARKER_MISSING) {
            return Some(StepError::ElementNotFound {
                selector: target.to_string(),
            });
        }
        if target.contains(MARKER_STALE) {
            return Some(StepError::StaleElement {
                selector: target.to_string(),
            });
        }
        if target.contains(MARKER_SLOW) {
            // report the wait as exhausted instead of sleeping it out
            let timeout_ms = match step {
                TestStep::Wait { timeout_ms, .. } => *timeout_ms,
                _ => 5000,
            };
            return Some(StepError::WaitTimeout {
                selector: target.to_string(),
                timeout_ms,
            });
        }
        if target.contains(MARKER_BROKEN) {
            return Some(StepError::AssertionFailed(format!(
                "element {} did not match expectation",
                target
            )));
        }
        if target.contains(MARKER_CRASH) {
            return Some(StepError::SessionLost(format!(
                "browser process exited while handling {}",
                target
            )));
        }
        None
    }

    fn flake(&self, step: &TestStep) -> Option<StepError> {
        if self.config.flake_rate <= 0.0 {
            return None;
        }
        let mut rng = rand::thread_rng();
        if rng.gen::<f32>() >= self.config.flake_rate {
            return None;
        }
        let selector = step.target().unwrap_or("page").to_string();
        Some(match rng.gen_range(0..3) {
            0 => StepError::ElementNotFound { selector },
            1 => StepError::StaleElement { selector },
            _ => StepError::WaitTimeout {
                selector,
                timeout_ms: 1000,
            },
        })
    }
}

#[async_trait]
impl ExecutionRunner for SimulationRunner {
    async fn run(&self, session: &SessionHandle, unit: &TestUnit, attempt: u32) -> RunnerReport {
        let mut transcript = vec![format!(
            "{} attempt {} on session {} at {}",
            unit.name, attempt, session.id, session.endpoint
        )];
        let mut artifacts = Vec::new();
        let mut failure = None;
        let mut steps_run = 0;

        for step in &unit.steps {
            if self.config.step_latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.step_latency_ms)).await;
            }

            if let Some(error) = Self::scripted_failure(step).or_else(|| self.flake(step)) {
                transcript.push(format!("{} .. {}", step.label(), error));
                failure = Some(error);
                break;
            }

            if let TestStep::Sleep { ms } = step {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }

            if let TestStep::Screenshot { name } = step {
                let capture = format!("simulated capture '{}' on {}", name, session.endpoint);
                match self
                    .artifacts
                    .write_screenshot(&unit.id, attempt, name, capture.as_bytes())
                {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(error) => warn!("screenshot write failed for {}: {}", unit.id, error),
                }
            }

            transcript.push(format!("{} .. ok", step.label()));
            steps_run += 1;
        }

        match self
            .artifacts
            .write_log(&unit.id, attempt, &transcript.join("\n"))
        {
            Ok(artifact) => artifacts.push(artifact),
            Err(error) => warn!("attempt log write failed for {}: {}", unit.id, error),
        }

        debug!(
            "unit {} attempt {}: ran {} of {} step(s)",
            unit.id,
            attempt,
            steps_run,
            unit.steps.len()
        );

        RunnerReport {
            steps_run,
            artifacts,
            failure,
        }
    }
}

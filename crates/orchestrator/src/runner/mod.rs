//! Execution runner seam
//!
//! The orchestrator drives sessions only through this trait; whatever
//! wire protocol sits behind it belongs to the automation client.

use async_trait::async_trait;
use gridrunner_common::{ArtifactRef, SessionHandle, StepError, TestUnit};

pub mod sim;

pub use sim::{SimulationRunner, SimulatorConfig};

/// What one attempt produced
#[derive(Debug, Clone, Default)]
pub struct RunnerReport {
    /// Steps completed before stopping
    pub steps_run: usize,
    /// Artifacts written during the attempt
    pub artifacts: Vec<ArtifactRef>,
    /// First failure, when the attempt did not run clean
    pub failure: Option<StepError>,
}

/// Drives one session through one test unit's steps.
///
/// Failures are reported in the result rather than raised; the retry
/// controller owns their classification. `attempt` is the 1-based
/// attempt number, used to keep artifact paths distinct.
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    async fn run(&self, session: &SessionHandle, unit: &TestUnit, attempt: u32) -> RunnerReport;
}

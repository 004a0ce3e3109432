//! GridRunner Orchestrator
//!
//! Schedules test units onto a pool of remote browser sessions. The
//! dispatcher feeds a bounded worker pool, the retry controller drives
//! attempts against fresh sessions, and every terminal result lands in
//! the aggregator exactly once.

pub mod aggregator;
pub mod artifacts;
pub mod config;
pub mod dispatcher;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod runner;

// Re-export the assembly surface
pub use aggregator::{JsonlSink, ReportSink, ResultAggregator};
pub use artifacts::ArtifactWorkspace;
pub use config::{BackoffPolicy, OrchestratorConfig, PoolConfig};
pub use dispatcher::Submission;
pub use orchestrator::Orchestrator;
pub use pool::{Provisioner, SessionInfo, SessionPool};
pub use runner::{ExecutionRunner, RunnerReport, SimulationRunner, SimulatorConfig};

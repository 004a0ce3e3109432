//! Bounded retry around a single test unit
//!
//! Drives attempts against fresh sessions, classifies runner failures,
//! and produces exactly one terminal result per unit.

use chrono::Utc;
use gridrunner_common::{
    AttemptOutcome, ExecutionAttempt, FailureDetail, FailureKind, Result, StepError, TestResult,
    TestUnit, UnitState,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::dispatcher::UnitStates;
use crate::pool::SessionPool;
use crate::runner::ExecutionRunner;

/// Map a runner failure onto the retry taxonomy
pub fn classify(error: &StepError) -> FailureKind {
    match error {
        StepError::ElementNotFound { .. }
        | StepError::StaleElement { .. }
        | StepError::WaitTimeout { .. } => FailureKind::Transient,
        StepError::AssertionFailed(_) => FailureKind::Terminal,
        StepError::SessionLost(_) | StepError::Transport(_) => FailureKind::Fatal,
    }
}

pub struct RetryController {
    pool: SessionPool,
    runner: Arc<dyn ExecutionRunner>,
    config: OrchestratorConfig,
    states: UnitStates,
}

impl RetryController {
    pub fn new(
        pool: SessionPool,
        runner: Arc<dyn ExecutionRunner>,
        config: OrchestratorConfig,
        states: UnitStates,
    ) -> Self {
        Self {
            pool,
            runner,
            config,
            states,
        }
    }

    /// Execute one unit to a terminal result.
    ///
    /// A unit with retry budget N runs at most N + 1 attempts; only
    /// transient failures consume budget. Errs only when no attempt
    /// could be started at all.
    pub async fn execute(&self, unit: &TestUnit) -> Result<TestResult> {
        let max_retry = self.config.max_retry_for(unit);
        let deadline = self.config.execution_timeout_for(unit);
        let mut attempts: Vec<ExecutionAttempt> = Vec::new();

        loop {
            let number = attempts.len() as u32 + 1;

            // every attempt runs on a freshly acquired session; the
            // previous one is not trusted after a failure
            let session = match self
                .pool
                .acquire(&unit.capability, self.config.acquire_timeout())
                .await
            {
                Ok(session) => session,
                Err(error) if attempts.is_empty() => return Err(error),
                Err(error) => {
                    warn!(
                        "unit {}: no session for attempt {} ({}), keeping previous outcome",
                        unit.id, number, error
                    );
                    break;
                }
            };

            self.states.insert(unit.id.clone(), UnitState::Executing);
            debug!(
                "unit {} attempt {} on session {}",
                unit.id, number, session.id
            );

            let started_at = Utc::now().timestamp_millis();
            let run = tokio::time::timeout(deadline, self.runner.run(&session, unit, number)).await;
            let finished_at = Utc::now().timestamp_millis();

            let mut attempt = ExecutionAttempt {
                unit_id: unit.id.clone(),
                number,
                session_id: session.id.clone(),
                started_at,
                finished_at,
                outcome: AttemptOutcome::Errored,
                failure: None,
                artifacts: Vec::new(),
            };

            let report = match run {
                Ok(report) => report,
                Err(_) => {
                    // deadline expiry cancels the attempt; the session may
                    // be mid-interaction and is not reusable
                    self.pool.mark_dead(&session);
                    warn!(
                        "unit {} attempt {} cancelled after {}ms",
                        unit.id,
                        number,
                        deadline.as_millis()
                    );
                    attempt.outcome = AttemptOutcome::TimedOut;
                    attempt.failure = Some(FailureDetail {
                        kind: FailureKind::Fatal,
                        message: format!("attempt deadline of {}ms expired", deadline.as_millis()),
                    });
                    attempts.push(attempt);
                    break;
                }
            };

            attempt.artifacts = report.artifacts;

            let error = match report.failure {
                None => {
                    self.pool.release(&session);
                    attempt.outcome = AttemptOutcome::Passed;
                    attempts.push(attempt);
                    break;
                }
                Some(error) => error,
            };

            let kind = classify(&error);
            attempt.failure = Some(FailureDetail {
                kind,
                message: error.to_string(),
            });

            match kind {
                FailureKind::Fatal => {
                    self.pool.mark_dead(&session);
                    attempt.outcome = AttemptOutcome::Errored;
                    attempts.push(attempt);
                    break;
                }
                FailureKind::Terminal => {
                    self.pool.release(&session);
                    attempt.outcome = AttemptOutcome::Failed;
                    attempts.push(attempt);
                    break;
                }
                FailureKind::Transient => {
                    self.pool.release(&session);
                    attempt.outcome = AttemptOutcome::Failed;
                    attempts.push(attempt);

                    let retries_used = attempts.len() as u32 - 1;
                    if retries_used >= max_retry {
                        debug!("unit {}: retry budget of {} exhausted", unit.id, max_retry);
                        break;
                    }

                    self.states.insert(unit.id.clone(), UnitState::Retrying);
                    let delay = self.config.backoff.delay_for(retries_used + 1);
                    debug!(
                        "unit {}: transient failure, retry {} of {} in {:?}",
                        unit.id,
                        retries_used + 1,
                        max_retry,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(TestResult::new(unit, attempts))
    }
}

//! End-to-end orchestration tests over scripted execution runners

use async_trait::async_trait;
use gridrunner_common::{
    AttemptOutcome, BrowserFamily, Capability, Error, FailureKind, ResultFilter, ResultStore,
    SessionHandle, StepError, TestStep, TestUnit, UnitState,
};
use gridrunner_orchestrator::runner::{ExecutionRunner, RunnerReport};
use gridrunner_orchestrator::{BackoffPolicy, Orchestrator, OrchestratorConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn chrome() -> Capability {
    Capability::new(BrowserFamily::Chrome)
}

fn firefox() -> Capability {
    Capability::new(BrowserFamily::Firefox)
}

fn unit(name: &str, capability: Capability) -> TestUnit {
    TestUnit::new(
        name,
        capability,
        vec![TestStep::Navigate {
            url: "/".to_string(),
        }],
    )
}

fn test_config(acquire_timeout_ms: u64) -> OrchestratorConfig {
    OrchestratorConfig {
        concurrency_limit: 2,
        max_retry: 2,
        acquire_timeout_ms,
        execution_timeout_ms: 5_000,
        backoff: BackoffPolicy::Fixed { delay_ms: 10 },
        feed_path: None,
        ..Default::default()
    }
}

fn orchestrator(config: OrchestratorConfig, runner: Arc<dyn ExecutionRunner>) -> Orchestrator {
    Orchestrator::with_store(config, runner, ResultStore::open_memory().unwrap()).unwrap()
}

fn transient() -> StepError {
    StepError::ElementNotFound {
        selector: "#flaky".to_string(),
    }
}

fn terminal() -> StepError {
    StepError::AssertionFailed("total was 41, expected 42".to_string())
}

fn fatal() -> StepError {
    StepError::SessionLost("browser process exited".to_string())
}

/// Replays a per-unit script of attempt outcomes; unscripted units pass
#[derive(Default)]
struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<Option<StepError>>>>,
}

impl ScriptedRunner {
    fn script(&self, unit_id: &str, outcomes: Vec<Option<StepError>>) {
        self.scripts
            .lock()
            .insert(unit_id.to_string(), outcomes.into());
    }
}

#[async_trait]
impl ExecutionRunner for ScriptedRunner {
    async fn run(&self, _session: &SessionHandle, unit: &TestUnit, _attempt: u32) -> RunnerReport {
        let failure = self
            .scripts
            .lock()
            .get_mut(&unit.id)
            .and_then(|script| script.pop_front())
            .flatten();
        RunnerReport {
            steps_run: unit.steps.len(),
            artifacts: Vec::new(),
            failure,
        }
    }
}

#[tokio::test]
async fn test_passes_after_transient_retries() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner.clone());
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let target = unit("flaky-login", chrome()).with_max_retry(2);
    runner.script(&target.id, vec![Some(transient()), Some(transient()), None]);
    let target_id = target.id.clone();

    let result = orch.submit(target).unwrap().wait().await.unwrap();

    assert_eq!(result.final_status(), AttemptOutcome::Passed);
    assert_eq!(result.attempts.len(), 3);
    assert_eq!(result.retry_count(), 2);
    for (index, attempt) in result.attempts.iter().enumerate() {
        assert_eq!(attempt.number, index as u32 + 1);
    }
    for attempt in &result.attempts[..2] {
        assert_eq!(attempt.outcome, AttemptOutcome::Failed);
        assert_eq!(
            attempt.failure.as_ref().unwrap().kind,
            FailureKind::Transient
        );
    }
    assert_eq!(
        orch.unit_state(&target_id),
        Some(UnitState::Completed(AttemptOutcome::Passed))
    );

    orch.shutdown().await;
}

#[tokio::test]
async fn test_terminal_failure_stops_retrying() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner.clone());
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let target = unit("broken-assert", chrome()).with_max_retry(3);
    runner.script(&target.id, vec![Some(terminal())]);

    let result = orch.submit(target).unwrap().wait().await.unwrap();

    assert_eq!(result.final_status(), AttemptOutcome::Failed);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.retry_count(), 0);
    assert_eq!(
        result.attempts[0].failure.as_ref().unwrap().kind,
        FailureKind::Terminal
    );

    orch.shutdown().await;
}

#[tokio::test]
async fn test_retry_budget_bounds_attempts() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner.clone());
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let target = unit("always-flaky", chrome()).with_max_retry(1);
    runner.script(
        &target.id,
        vec![Some(transient()), Some(transient()), Some(transient())],
    );

    let result = orch.submit(target).unwrap().wait().await.unwrap();

    // budget N allows N + 1 attempts, every one classified transient
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.final_status(), AttemptOutcome::Failed);
    for attempt in &result.attempts {
        assert_eq!(
            attempt.failure.as_ref().unwrap().kind,
            FailureKind::Transient
        );
    }

    orch.shutdown().await;
}

#[tokio::test]
async fn test_rejects_empty_step_sequence() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner);
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let empty = TestUnit::new("no-steps", chrome(), Vec::new());
    let empty_id = empty.id.clone();

    let err = orch.submit(empty).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(orch.unit_state(&empty_id), None);
    assert!(orch
        .aggregator()
        .query(&ResultFilter::default())
        .unwrap()
        .is_empty());

    orch.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_when_no_matching_sessions() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(300), runner);
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let target = unit("needs-firefox", firefox());
    let target_id = target.id.clone();

    let started = Instant::now();
    let err = orch.submit(target).unwrap().wait().await.unwrap_err();

    assert!(matches!(err, Error::Unavailable { waited_ms: 300, .. }));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(orch.unit_state(&target_id), Some(UnitState::Unavailable));
    // no attempt was ever produced
    assert!(orch
        .aggregator()
        .query(&ResultFilter::default())
        .unwrap()
        .is_empty());

    orch.shutdown().await;
}

#[tokio::test]
async fn test_fatal_failure_removes_session_from_pool() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner.clone());
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.register_session(SessionHandle::new(chrome(), "grid://node-2"));
    orch.start();

    let crasher = unit("crasher", chrome());
    runner.script(&crasher.id, vec![Some(fatal())]);

    let crashed = orch.submit(crasher).unwrap().wait().await.unwrap();
    assert_eq!(crashed.final_status(), AttemptOutcome::Errored);
    assert_eq!(
        crashed.attempts[0].failure.as_ref().unwrap().kind,
        FailureKind::Fatal
    );

    let dead_id = crashed.attempts[0].session_id.clone();
    let snapshot = orch.pool().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.iter().all(|s| s.handle.id != dead_id));

    // the surviving session still serves work
    let follow_up = unit("survivor", chrome());
    let passed = orch.submit(follow_up).unwrap().wait().await.unwrap();
    assert_eq!(passed.final_status(), AttemptOutcome::Passed);
    assert_ne!(passed.attempts[0].session_id, dead_id);

    orch.shutdown().await;
}

/// Records (session, start, end) for every run to detect double booking
#[derive(Default)]
struct RecordingRunner {
    intervals: Mutex<Vec<(String, Instant, Instant)>>,
}

#[async_trait]
impl ExecutionRunner for RecordingRunner {
    async fn run(&self, session: &SessionHandle, _unit: &TestUnit, _attempt: u32) -> RunnerReport {
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.intervals
            .lock()
            .push((session.id.clone(), started, Instant::now()));
        RunnerReport {
            steps_run: 1,
            artifacts: Vec::new(),
            failure: None,
        }
    }
}

#[tokio::test]
async fn test_sessions_are_never_double_booked() {
    let runner = Arc::new(RecordingRunner::default());
    let mut orch = orchestrator(test_config(2_000), runner.clone());
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.register_session(SessionHandle::new(chrome(), "grid://node-2"));
    orch.start();

    let units = (0..6)
        .map(|i| unit(&format!("unit-{}", i), chrome()))
        .collect();
    let outcomes = orch.run_all(units).await;
    assert_eq!(outcomes.len(), 6);
    for (_, outcome) in &outcomes {
        assert_eq!(
            outcome.as_ref().unwrap().final_status(),
            AttemptOutcome::Passed
        );
    }

    let mut by_session: HashMap<String, Vec<(Instant, Instant)>> = HashMap::new();
    for (session_id, started, finished) in runner.intervals.lock().iter() {
        by_session
            .entry(session_id.clone())
            .or_default()
            .push((*started, *finished));
    }
    for (session_id, mut intervals) in by_session {
        intervals.sort_by_key(|(started, _)| *started);
        for pair in intervals.windows(2) {
            assert!(
                pair[1].0 >= pair[0].1,
                "session {} ran two units concurrently",
                session_id
            );
        }
    }

    orch.shutdown().await;
}

#[tokio::test]
async fn test_starved_capability_does_not_block_others() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(5_000), runner);
    orch.register_session(SessionHandle::new(firefox(), "grid://ff-1"));
    orch.start();

    // the starved unit is submitted first but must not hold up firefox
    let starved = unit("starved", chrome());
    let starved_id = starved.id.clone();
    let starved_submission = orch.submit(starved).unwrap();

    let served = unit("served", firefox());
    let result = orch.submit(served).unwrap().wait().await.unwrap();
    assert_eq!(result.final_status(), AttemptOutcome::Passed);

    assert_eq!(orch.unit_state(&starved_id), Some(UnitState::Queued));

    orch.shutdown().await;
    assert!(matches!(
        starved_submission.wait().await,
        Err(Error::ShutDown)
    ));
}

struct SleepyRunner {
    delay: Duration,
}

#[async_trait]
impl ExecutionRunner for SleepyRunner {
    async fn run(&self, _session: &SessionHandle, _unit: &TestUnit, _attempt: u32) -> RunnerReport {
        tokio::time::sleep(self.delay).await;
        RunnerReport {
            steps_run: 1,
            artifacts: Vec::new(),
            failure: None,
        }
    }
}

#[tokio::test]
async fn test_attempt_deadline_cancels_without_retry() {
    let runner = Arc::new(SleepyRunner {
        delay: Duration::from_millis(500),
    });
    let mut orch = orchestrator(test_config(1_000), runner);
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let target = unit("hung", chrome())
        .with_max_retry(2)
        .with_timeout_ms(100);
    let target_id = target.id.clone();

    let result = orch.submit(target).unwrap().wait().await.unwrap();

    assert_eq!(result.final_status(), AttemptOutcome::TimedOut);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(
        result.attempts[0].failure.as_ref().unwrap().kind,
        FailureKind::Fatal
    );
    assert_eq!(
        orch.unit_state(&target_id),
        Some(UnitState::Completed(AttemptOutcome::TimedOut))
    );
    // the cancelled attempt's session is not reusable
    assert!(orch.pool().snapshot().is_empty());

    orch.shutdown().await;
}

#[tokio::test]
async fn test_results_are_recorded_once_and_queryable() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner.clone());
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();

    let passing = unit("passing", chrome());
    let failing = unit("failing", chrome()).with_max_retry(0);
    runner.script(&failing.id, vec![Some(terminal())]);

    let outcomes = orch.run_all(vec![passing, failing]).await;
    assert_eq!(outcomes.len(), 2);

    let failed = orch
        .aggregator()
        .query(&ResultFilter {
            status: Some(AttemptOutcome::Failed),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "failing");

    let summary = orch.aggregator().summary().unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);

    // replaying a finished result is a no-op
    let (_, replay) = &outcomes[0];
    let replay = replay.as_ref().unwrap();
    assert!(!orch.aggregator().record(replay).unwrap());
    assert_eq!(orch.aggregator().summary().unwrap().total, 2);

    orch.shutdown().await;
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut orch = orchestrator(test_config(1_000), runner);
    orch.register_session(SessionHandle::new(chrome(), "grid://node-1"));
    orch.start();
    orch.shutdown().await;

    let late = unit("late", chrome());
    assert!(matches!(orch.submit(late), Err(Error::ShutDown)));
}

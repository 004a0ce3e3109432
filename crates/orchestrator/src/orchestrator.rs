//! Orchestrator assembly and worker pool
//!
//! Wires the session pool, dispatcher, retry controller, and aggregator
//! together behind a bounded worker pool. Submitted units resolve
//! through their Submission exactly once, including across shutdown.

use futures::future::join_all;
use gridrunner_common::{
    Error, Result, ResultStore, SessionHandle, TestResult, TestUnit, UnitState,
};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::aggregator::{JsonlSink, ResultAggregator};
use crate::config::OrchestratorConfig;
use crate::dispatcher::{Dispatcher, PulledUnit, Submission};
use crate::pool::{Provisioner, SessionPool};
use crate::retry::RetryController;
use crate::runner::ExecutionRunner;

pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: SessionPool,
    dispatcher: Arc<Dispatcher>,
    aggregator: ResultAggregator,
    controller: Arc<RetryController>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build an orchestrator storing results at the configured path
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn ExecutionRunner>) -> Result<Self> {
        let store = ResultStore::open(&config.results_db)?;
        Self::with_store(config, runner, store)
    }

    /// Build an orchestrator over an existing result store
    pub fn with_store(
        config: OrchestratorConfig,
        runner: Arc<dyn ExecutionRunner>,
        store: ResultStore,
    ) -> Result<Self> {
        let aggregator = ResultAggregator::new(store);
        if let Some(feed) = &config.feed_path {
            aggregator.attach(Arc::new(JsonlSink::create(feed)?));
        }

        let pool = SessionPool::new(config.pool.min_pool_size);
        let dispatcher = Arc::new(Dispatcher::new(config.acquire_timeout()));
        let controller = Arc::new(RetryController::new(
            pool.clone(),
            runner,
            config.clone(),
            dispatcher.states(),
        ));
        let semaphore = Arc::new(Semaphore::new(config.concurrency_limit));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            pool,
            dispatcher,
            aggregator,
            controller,
            semaphore,
            shutdown,
            workers: Vec::new(),
        })
    }

    /// Add a session to the pool (initial fleet or provisioner delivery)
    pub fn register_session(&self, handle: SessionHandle) {
        self.pool.register(handle);
    }

    /// Install the grid-node provisioner
    pub fn set_provisioner(&self, provisioner: Arc<dyn Provisioner>) {
        self.pool.set_provisioner(provisioner);
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Dispatch state for a submitted unit
    pub fn unit_state(&self, unit_id: &str) -> Option<UnitState> {
        self.dispatcher.unit_state(unit_id)
    }

    /// Spawn the execution workers. Must run before any submission can
    /// make progress; calling it again is a no-op.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        info!(
            "starting {} execution worker(s)",
            self.config.concurrency_limit
        );
        for worker in 0..self.config.concurrency_limit {
            let dispatcher = self.dispatcher.clone();
            let pool = self.pool.clone();
            let controller = self.controller.clone();
            let aggregator = self.aggregator.clone();
            let semaphore = self.semaphore.clone();
            let mut shutdown_rx = self.shutdown.subscribe();

            self.workers.push(tokio::spawn(async move {
                loop {
                    // in-flight executions never exceed the configured
                    // limit, independent of worker count
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };

                    let pulled = tokio::select! {
                        pulled = dispatcher.next(&pool) => pulled,
                        _ = shutdown_rx.changed() => None,
                    };
                    let PulledUnit { unit, done } = match pulled {
                        Some(pulled) => pulled,
                        None => break,
                    };

                    match controller.execute(&unit).await {
                        Ok(result) => {
                            if let Err(e) = aggregator.record(&result) {
                                error!("failed to record result for unit {}: {}", unit.id, e);
                            }
                            dispatcher
                                .set_state(&unit.id, UnitState::Completed(result.final_status()));
                            let _ = done.send(Ok(result));
                        }
                        Err(e) => {
                            if matches!(e, Error::Unavailable { .. }) {
                                dispatcher.set_state(&unit.id, UnitState::Unavailable);
                            }
                            debug!("unit {} resolved without attempts: {}", unit.id, e);
                            let _ = done.send(Err(e));
                        }
                    }

                    drop(permit);
                }
                debug!("worker {} stopped", worker);
            }));
        }
    }

    /// Queue one unit; the returned submission resolves on completion
    pub fn submit(&self, unit: TestUnit) -> Result<Submission> {
        self.dispatcher.submit(unit)
    }

    /// Submit a batch and wait for every unit to resolve
    pub async fn run_all(&self, units: Vec<TestUnit>) -> Vec<(String, Result<TestResult>)> {
        let mut pending = Vec::new();
        let mut outcomes = Vec::new();

        for unit in units {
            let unit_id = unit.id.clone();
            match self.submit(unit) {
                Ok(submission) => pending.push(submission),
                Err(error) => outcomes.push((unit_id, Err(error))),
            }
        }
        for submission in pending {
            let unit_id = submission.unit_id().to_string();
            outcomes.push((unit_id, submission.wait().await));
        }
        outcomes
    }

    /// Stop accepting work, resolve queued waiters, drain the pool, and
    /// join the workers
    pub async fn shutdown(&mut self) {
        info!("orchestrator shutting down");
        let _ = self.shutdown.send(true);
        self.dispatcher.close();
        self.pool.drain();
        let _ = join_all(self.workers.drain(..)).await;
        info!("orchestrator stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.dispatcher.close();
    }
}

//! Capability-aware dispatch queues
//!
//! One FIFO lane per required capability. Workers pull round-robin
//! across lanes and only from lanes whose capability currently has an
//! idle session, so a starved capability cannot block the rest. A unit
//! that outwaits the acquire timeout in its queue resolves as
//! unavailable without ever dispatching.

use dashmap::DashMap;
use gridrunner_common::{Capability, Error, Result, TestResult, TestUnit, UnitState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::pool::SessionPool;

/// Shared per-unit dispatch state registry
pub type UnitStates = Arc<DashMap<String, UnitState>>;

/// How often idle workers recheck gated lanes
const PULL_TICK: Duration = Duration::from_millis(100);

struct QueuedUnit {
    unit: TestUnit,
    done: oneshot::Sender<Result<TestResult>>,
    enqueued_at: Instant,
}

struct Lane {
    capability: Capability,
    queue: VecDeque<QueuedUnit>,
}

struct Lanes {
    lanes: Vec<Lane>,
    cursor: usize,
    closed: bool,
}

impl Lanes {
    fn push(&mut self, queued: QueuedUnit) {
        let capability = queued.unit.capability.clone();
        match self.lanes.iter_mut().find(|l| l.capability == capability) {
            Some(lane) => lane.queue.push_back(queued),
            None => self.lanes.push(Lane {
                capability,
                queue: VecDeque::from([queued]),
            }),
        }
    }

    /// Front of the next non-empty lane with an idle session, scanning
    /// round-robin from the cursor
    fn pull_ready(&mut self, pool: &SessionPool) -> Option<QueuedUnit> {
        if self.lanes.is_empty() {
            return None;
        }
        for offset in 0..self.lanes.len() {
            let index = (self.cursor + offset) % self.lanes.len();
            if self.lanes[index].queue.is_empty() {
                continue;
            }
            if !pool.has_idle(&self.lanes[index].capability) {
                continue;
            }
            let queued = self.lanes[index].queue.pop_front();
            self.cursor = (index + 1) % self.lanes.len();
            return queued;
        }
        None
    }

    /// A lane front that has outwaited `timeout`, if any
    fn pop_expired(&mut self, timeout: Duration) -> Option<QueuedUnit> {
        for lane in &mut self.lanes {
            if let Some(front) = lane.queue.front() {
                if front.enqueued_at.elapsed() >= timeout {
                    return lane.queue.pop_front();
                }
            }
        }
        None
    }

    /// Time until the oldest lane front expires
    fn next_expiry(&self, timeout: Duration) -> Option<Duration> {
        self.lanes
            .iter()
            .filter_map(|lane| lane.queue.front())
            .map(|front| timeout.saturating_sub(front.enqueued_at.elapsed()))
            .min()
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.queue.is_empty())
    }

    fn drain_all(&mut self) -> Vec<QueuedUnit> {
        let mut drained = Vec::new();
        for lane in &mut self.lanes {
            drained.extend(lane.queue.drain(..));
        }
        drained
    }
}

/// Resolves when the submitted unit reaches a terminal outcome
#[derive(Debug)]
pub struct Submission {
    unit_id: String,
    rx: oneshot::Receiver<Result<TestResult>>,
}

impl Submission {
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// Wait for the unit's terminal result
    pub async fn wait(self) -> Result<TestResult> {
        match self.rx.await {
            Ok(result) => result,
            // completion channel dropped mid-flight
            Err(_) => Err(Error::ShutDown),
        }
    }
}

/// A dispatched unit plus its completion channel
pub(crate) struct PulledUnit {
    pub unit: TestUnit,
    pub done: oneshot::Sender<Result<TestResult>>,
}

enum Pending {
    Expired(QueuedUnit),
    Gated(Duration),
    Empty,
}

pub struct Dispatcher {
    queues: Mutex<Lanes>,
    states: UnitStates,
    notify: Notify,
    acquire_timeout: Duration,
}

impl Dispatcher {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(Lanes {
                lanes: Vec::new(),
                cursor: 0,
                closed: false,
            }),
            states: Arc::new(DashMap::new()),
            notify: Notify::new(),
            acquire_timeout,
        }
    }

    /// Validate and enqueue a unit. A rejected unit never reaches a
    /// queue and leaves no trace in the state registry.
    pub fn submit(&self, unit: TestUnit) -> Result<Submission> {
        unit.validate()?;

        let (done, rx) = oneshot::channel();
        let unit_id = unit.id.clone();
        {
            let mut queues = self.queues.lock();
            if queues.closed {
                return Err(Error::ShutDown);
            }
            self.states.insert(unit_id.clone(), UnitState::Queued);
            queues.push(QueuedUnit {
                unit,
                done,
                enqueued_at: Instant::now(),
            });
        }
        debug!("queued unit {}", unit_id);
        self.notify.notify_waiters();

        Ok(Submission { unit_id, rx })
    }

    /// Pull the next dispatchable unit. Blocks until one is ready;
    /// returns None once the dispatcher is closed.
    pub(crate) async fn next(&self, pool: &SessionPool) -> Option<PulledUnit> {
        loop {
            // register interest before inspecting the queues so a submit
            // landing in between is never missed
            let notified = self.notify.notified();

            let pending = {
                let mut queues = self.queues.lock();
                if queues.closed {
                    return None;
                }
                if let Some(queued) = queues.pull_ready(pool) {
                    self.states
                        .insert(queued.unit.id.clone(), UnitState::Dispatched);
                    debug!(
                        "dispatching unit {} ({})",
                        queued.unit.id, queued.unit.capability
                    );
                    return Some(PulledUnit {
                        unit: queued.unit,
                        done: queued.done,
                    });
                }
                if let Some(queued) = queues.pop_expired(self.acquire_timeout) {
                    Pending::Expired(queued)
                } else if queues.is_empty() {
                    Pending::Empty
                } else {
                    let delay = queues
                        .next_expiry(self.acquire_timeout)
                        .map_or(PULL_TICK, |d| d.min(PULL_TICK));
                    Pending::Gated(delay)
                }
            };

            match pending {
                Pending::Expired(queued) => {
                    self.resolve_unavailable(queued);
                    continue;
                }
                Pending::Gated(delay) => {
                    let _ = tokio::time::timeout(delay, notified).await;
                }
                Pending::Empty => notified.await,
            }
        }
    }

    fn resolve_unavailable(&self, queued: QueuedUnit) {
        let waited_ms = self.acquire_timeout.as_millis() as u64;
        warn!(
            "unit {} saw no idle {} session within {}ms",
            queued.unit.id, queued.unit.capability, waited_ms
        );
        self.states
            .insert(queued.unit.id.clone(), UnitState::Unavailable);
        let _ = queued.done.send(Err(Error::Unavailable {
            capability: queued.unit.capability.to_string(),
            waited_ms,
        }));
    }

    /// Refuse new work and resolve every queued waiter. Queued units are
    /// never dispatched after this.
    pub fn close(&self) {
        let drained = {
            let mut queues = self.queues.lock();
            if queues.closed {
                return;
            }
            queues.closed = true;
            queues.drain_all()
        };
        if !drained.is_empty() {
            debug!("resolving {} queued unit(s) on close", drained.len());
        }
        for queued in drained {
            // dispatch state intentionally stays Queued; only the waiter resolves
            let _ = queued.done.send(Err(Error::ShutDown));
        }
        self.notify.notify_waiters();
    }

    /// Dispatch state for a submitted unit
    pub fn unit_state(&self, unit_id: &str) -> Option<UnitState> {
        self.states.get(unit_id).map(|state| *state)
    }

    pub(crate) fn set_state(&self, unit_id: &str, state: UnitState) {
        self.states.insert(unit_id.to_string(), state);
    }

    pub(crate) fn states(&self) -> UnitStates {
        self.states.clone()
    }

    /// Units currently waiting in queues
    pub fn queued_len(&self) -> usize {
        self.queues
            .lock()
            .lanes
            .iter()
            .map(|lane| lane.queue.len())
            .sum()
    }
}

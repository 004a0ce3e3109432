//! Session pool over remote grid nodes
//!
//! Owns the only status table for sessions. Acquire hands out exclusive
//! use of a matching idle handle, release returns it, and a handle marked
//! dead is dropped from the table; when that leaves a capability below
//! the configured minimum, replacements are requested from the installed
//! provisioner.

use async_trait::async_trait;
use gridrunner_common::{Capability, Error, Result, SessionHandle, SessionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Supplies replacement sessions when pool capacity drops below minimum
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision `count` new sessions offering `capability`
    async fn provision(&self, capability: &Capability, count: usize) -> Vec<SessionHandle>;
}

/// Point-in-time view of one pool slot
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub status: SessionStatus,
}

struct Slot {
    handle: SessionHandle,
    status: SessionStatus,
}

struct PoolInner {
    slots: HashMap<String, Slot>,
    draining: bool,
}

impl PoolInner {
    fn take_idle(&mut self, capability: &Capability) -> Option<SessionHandle> {
        let id = self
            .slots
            .values()
            .find(|slot| {
                slot.status == SessionStatus::Idle && slot.handle.capability.satisfies(capability)
            })
            .map(|slot| slot.handle.id.clone())?;
        let slot = self.slots.get_mut(&id)?;
        slot.status = SessionStatus::Busy;
        Some(slot.handle.clone())
    }
}

/// Pool of remote browser sessions keyed by handle id
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<Mutex<PoolInner>>,
    notify: Arc<Notify>,
    provisioner: Arc<Mutex<Option<Arc<dyn Provisioner>>>>,
    min_pool_size: usize,
}

impl SessionPool {
    pub fn new(min_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                slots: HashMap::new(),
                draining: false,
            })),
            notify: Arc::new(Notify::new()),
            provisioner: Arc::new(Mutex::new(None)),
            min_pool_size,
        }
    }

    /// Install the provisioner consulted when capacity drops below minimum
    pub fn set_provisioner(&self, provisioner: Arc<dyn Provisioner>) {
        *self.provisioner.lock() = Some(provisioner);
    }

    /// Add a session to the pool as idle
    pub fn register(&self, handle: SessionHandle) {
        {
            let mut inner = self.inner.lock();
            if inner.draining {
                debug!("pool draining, dropping registration of session {}", handle.id);
                return;
            }
            info!(
                "registered session {} ({}) at {}",
                handle.id, handle.capability, handle.endpoint
            );
            inner.slots.insert(
                handle.id.clone(),
                Slot {
                    handle,
                    status: SessionStatus::Idle,
                },
            );
        }
        self.notify.notify_waiters();
    }

    /// Acquire exclusive use of an idle session satisfying `capability`.
    ///
    /// Blocks until a match frees up or `timeout` elapses. The wait is
    /// registered before the table is checked, so a release landing
    /// between the check and the wait is never missed.
    pub async fn acquire(
        &self,
        capability: &Capability,
        timeout: Duration,
    ) -> Result<SessionHandle> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();

            {
                let mut inner = self.inner.lock();
                if inner.draining {
                    return Err(Error::ShutDown);
                }
                if let Some(handle) = inner.take_idle(capability) {
                    debug!("acquired session {} for {}", handle.id, capability);
                    return Ok(handle);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Unavailable {
                    capability: capability.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    /// Return a session to the pool.
    ///
    /// While draining, released sessions are removed instead of going
    /// back to idle.
    pub fn release(&self, handle: &SessionHandle) {
        {
            let mut inner = self.inner.lock();
            if inner.draining {
                if inner.slots.remove(&handle.id).is_some() {
                    debug!("session {} released while draining, removed", handle.id);
                }
                return;
            }
            match inner.slots.get_mut(&handle.id) {
                Some(slot) => {
                    slot.status = SessionStatus::Idle;
                    debug!("released session {}", handle.id);
                }
                None => {
                    warn!("release of unknown session {}", handle.id);
                    return;
                }
            }
        }
        self.notify.notify_waiters();
    }

    /// Drop a session whose node is gone or unusable.
    ///
    /// The handle leaves the table immediately and can never be acquired
    /// again; replacements are requested when its capability falls below
    /// the minimum pool size.
    pub fn mark_dead(&self, handle: &SessionHandle) {
        let remaining = {
            let mut inner = self.inner.lock();
            if inner.slots.remove(&handle.id).is_none() {
                warn!("mark_dead for unknown session {}", handle.id);
                return;
            }
            if inner.draining {
                return;
            }
            inner
                .slots
                .values()
                .filter(|slot| slot.handle.capability == handle.capability)
                .count()
        };

        warn!(
            "session {} ({}) at {} marked {}",
            handle.id,
            handle.capability,
            handle.endpoint,
            SessionStatus::Dead
        );

        if remaining < self.min_pool_size {
            self.request_provisioning(handle.capability.clone(), self.min_pool_size - remaining);
        }
    }

    fn request_provisioning(&self, capability: Capability, count: usize) {
        let provisioner = match self.provisioner.lock().clone() {
            Some(provisioner) => provisioner,
            None => {
                debug!("no provisioner installed, {} below minimum", capability);
                return;
            }
        };
        let pool = self.clone();
        tokio::spawn(async move {
            info!(
                "provisioning {} replacement session(s) for {}",
                count, capability
            );
            for handle in provisioner.provision(&capability, count).await {
                pool.register(handle);
            }
        });
    }

    /// Stop handing out sessions; idle slots move to draining and busy
    /// slots are removed on release.
    pub fn drain(&self) {
        {
            let mut inner = self.inner.lock();
            inner.draining = true;
            for slot in inner.slots.values_mut() {
                if slot.status == SessionStatus::Idle {
                    slot.status = SessionStatus::Draining;
                }
            }
        }
        info!("session pool draining");
        self.notify.notify_waiters();
    }

    /// Idle sessions currently satisfying `capability`
    pub fn idle_count(&self, capability: &Capability) -> usize {
        let inner = self.inner.lock();
        inner
            .slots
            .values()
            .filter(|slot| {
                slot.status == SessionStatus::Idle && slot.handle.capability.satisfies(capability)
            })
            .count()
    }

    pub fn has_idle(&self, capability: &Capability) -> bool {
        self.idle_count(capability) > 0
    }

    /// Current pool contents, ordered by endpoint
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock();
        let mut sessions: Vec<SessionInfo> = inner
            .slots
            .values()
            .map(|slot| SessionInfo {
                handle: slot.handle.clone(),
                status: slot.status,
            })
            .collect();
        sessions.sort_by(|a, b| a.handle.endpoint.cmp(&b.handle.endpoint));
        sessions
    }
}

//! Mutual-exclusion registry: which run keys are executing right now.
//!
//! Scoped to one process. Two scheduler processes pointed at the same
//! database will not see each other's entries.

use std::sync::Arc;

use dashmap::DashSet;
use keeper_core::RunKey;
use tracing::debug;

/// Injectable at-most-one-execution limiter keyed by [`RunKey`].
pub trait RunLimiter: Send + Sync {
    /// Atomically insert `key`; returns false if it was already active.
    fn try_acquire(&self, key: &RunKey) -> bool;

    /// Remove `key`. No-op when it is not active.
    fn release(&self, key: &RunKey);

    /// Snapshot of the active keys, sorted.
    fn active(&self) -> Vec<RunKey>;
}

/// Default in-memory limiter backed by a concurrent set.
#[derive(Default)]
pub struct RunRegistry {
    active: DashSet<RunKey>,
}

impl RunRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl RunLimiter for RunRegistry {
    fn try_acquire(&self, key: &RunKey) -> bool {
        self.active.insert(key.clone())
    }

    fn release(&self, key: &RunKey) {
        if self.active.remove(key).is_none() {
            debug!(run_key = %key, "release of inactive run key");
        }
    }

    fn active(&self) -> Vec<RunKey> {
        let mut keys: Vec<RunKey> = self.active.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Holds a run key for as long as it lives; releases it on drop.
pub struct RunGuard {
    limiter: Arc<dyn RunLimiter>,
    key: RunKey,
}

impl RunGuard {
    /// Returns `None` when `key` is already held.
    pub fn acquire(limiter: &Arc<dyn RunLimiter>, key: &RunKey) -> Option<Self> {
        if limiter.try_acquire(key) {
            Some(Self {
                limiter: Arc::clone(limiter),
                key: key.clone(),
            })
        } else {
            None
        }
    }

    pub fn key(&self) -> &RunKey {
        &self.key
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.limiter.release(&self.key);
    }
}

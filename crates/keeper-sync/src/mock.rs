//! In-memory adapters for tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use keeper_core::{ChainId, SyncCategory};
use tokio_util::sync::CancellationToken;

use crate::{ChainClient, ChangeDetector, ChangeEvent, IncrementalUpdater, SyncError, SyncResult};

/// Chain head that tests move by hand.
#[derive(Debug, Clone, Default)]
pub struct MockChainClient {
    latest: Arc<RwLock<u64>>,
    connected: Arc<RwLock<bool>>,
}

impl MockChainClient {
    pub fn new(latest: u64) -> Self {
        Self {
            latest: Arc::new(RwLock::new(latest)),
            connected: Arc::new(RwLock::new(true)),
        }
    }

    pub fn set_latest(&self, block: u64) {
        *self.latest.write().unwrap() = block;
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.write().unwrap() = connected;
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn latest_block(&self, chain: &ChainId) -> SyncResult<u64> {
        if !*self.connected.read().unwrap() {
            return Err(SyncError::ChainClient(format!("{chain}: not connected")));
        }
        Ok(*self.latest.read().unwrap())
    }
}

/// Serves canned events filtered to the requested range and records every call.
#[derive(Debug, Clone, Default)]
pub struct MockChangeDetector {
    events: Arc<RwLock<Vec<ChangeEvent>>>,
    calls: Arc<RwLock<Vec<(u64, u64)>>>,
}

impl MockChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entity_id: &str, block: u64) {
        self.events
            .write()
            .unwrap()
            .push(ChangeEvent::new(entity_id, block));
    }

    /// `(from, to)` of every `find_changed` call, in order.
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl ChangeDetector for MockChangeDetector {
    async fn find_changed(&self, _chain: &ChainId, from: u64, to: u64) -> SyncResult<Vec<ChangeEvent>> {
        self.calls.write().unwrap().push((from, to));
        Ok(self
            .events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.block >= from && e.block <= to)
            .cloned()
            .collect())
    }
}

/// Records batches and keeps a per-entity apply counter in place of a data store.
#[derive(Debug, Clone, Default)]
pub struct MockUpdater {
    batches: Arc<RwLock<Vec<Vec<String>>>>,
    applied: Arc<RwLock<HashMap<(SyncCategory, ChainId, String), u32>>>,
    fail_on_batch: Arc<RwLock<Option<usize>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl MockUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th call (0-based, counted over the updater's lifetime).
    pub fn fail_on_batch(&self, n: Option<usize>) {
        *self.fail_on_batch.write().unwrap() = n;
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap() = delay;
    }

    /// Every batch received, including the one that failed.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.read().unwrap().clone()
    }

    /// Distinct entities currently stored.
    pub fn entity_count(&self) -> usize {
        self.applied.read().unwrap().len()
    }

    pub fn applied_count(&self, category: SyncCategory, chain: &ChainId, entity_id: &str) -> u32 {
        self.applied
            .read()
            .unwrap()
            .get(&(category, chain.clone(), entity_id.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl IncrementalUpdater for MockUpdater {
    async fn refetch_and_upsert(
        &self,
        category: SyncCategory,
        chain: &ChainId,
        entity_ids: &[String],
        _cancel: &CancellationToken,
    ) -> SyncResult<usize> {
        let call = {
            let mut batches = self.batches.write().unwrap();
            batches.push(entity_ids.to_vec());
            batches.len() - 1
        };

        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_on_batch.read().unwrap() == Some(call) {
            return Err(SyncError::Updater(format!("injected failure on batch {call}")));
        }

        let mut applied = self.applied.write().unwrap();
        for id in entity_ids {
            *applied
                .entry((category, chain.clone(), id.clone()))
                .or_insert(0) += 1;
        }
        Ok(entity_ids.len())
    }
}

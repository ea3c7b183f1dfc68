//! One incremental sync cycle for a fixed `(category, chain)` pair.
//!
//! ```text
//!  checkpoint ──► latest ──► window [cp+1, min(latest, cp+max)]
//!                               │
//!                     find_changed (dedup by id)
//!                               │
//!               batches of batch_size, sequential upserts
//!                               │
//!                     set checkpoint = window.to
//! ```
//!
//! The checkpoint only moves after every batch succeeded, so a failed cycle is
//! simply retried over the same window on the next tick.

use std::collections::HashSet;
use std::sync::Arc;

use keeper_core::{ChainId, SyncCategory};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    BlockWindow, ChainClient, ChangeDetector, ChangeEvent, CheckpointStore, IncrementalUpdater,
    SyncError, SyncReport, SyncResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub max_window_blocks: u64,
    pub batch_size: usize,
}

impl SyncSettings {
    pub fn new(max_window_blocks: u64, batch_size: usize) -> SyncResult<Self> {
        if max_window_blocks == 0 {
            return Err(SyncError::InvalidConfig(
                "max_window_blocks must be at least 1".to_string(),
            ));
        }
        if batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_window_blocks,
            batch_size,
        })
    }
}

pub struct ChainSynchronizer {
    category: SyncCategory,
    chain: ChainId,
    settings: SyncSettings,
    client: Arc<dyn ChainClient>,
    detector: Arc<dyn ChangeDetector>,
    updater: Arc<dyn IncrementalUpdater>,
    store: Arc<dyn CheckpointStore>,
}

impl ChainSynchronizer {
    pub fn new(
        category: SyncCategory,
        chain: ChainId,
        settings: SyncSettings,
        client: Arc<dyn ChainClient>,
        detector: Arc<dyn ChangeDetector>,
        updater: Arc<dyn IncrementalUpdater>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            category,
            chain,
            settings,
            client,
            detector,
            updater,
            store,
        }
    }

    pub fn category(&self) -> SyncCategory {
        self.category
    }

    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    /// Run one cycle. `cancel` is checked before every batch and before the
    /// checkpoint write; once it fires nothing further is written.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let checkpoint = self
            .store
            .get(self.category, &self.chain)
            .await?
            .unwrap_or(0);
        let latest = self.client.latest_block(&self.chain).await?;

        let Some(window) =
            BlockWindow::after(checkpoint, latest, self.settings.max_window_blocks)
        else {
            debug!(
                category = %self.category,
                chain = %self.chain,
                checkpoint,
                latest,
                "already caught up"
            );
            return Ok(SyncReport {
                checkpoint,
                ..Default::default()
            });
        };

        let events = self
            .detector
            .find_changed(&self.chain, window.from, window.to)
            .await?;
        let changed = distinct_ids(events);

        let mut touched = 0;
        let mut batches = 0;
        for batch in changed.chunks(self.settings.batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            touched += self
                .updater
                .refetch_and_upsert(self.category, &self.chain, batch, cancel)
                .await?;
            batches += 1;
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.store.set(self.category, &self.chain, window.to).await?;

        info!(
            category = %self.category,
            chain = %self.chain,
            from = window.from,
            to = window.to,
            changed = changed.len(),
            touched,
            batches,
            "sync cycle complete"
        );

        Ok(SyncReport {
            window: Some(window),
            touched,
            batches,
            checkpoint: window.to,
        })
    }
}

/// Entity ids in first-seen order, each at most once.
fn distinct_ids(events: Vec<ChangeEvent>) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter_map(|e| seen.insert(e.entity_id.clone()).then_some(e.entity_id))
        .collect()
}

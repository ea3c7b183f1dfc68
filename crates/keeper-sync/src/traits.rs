//! Seams between the synchronizer and the outside world.
//!
//! Every method is a suspension point; implementations must be `Send + Sync`
//! because one instance is shared by the job loop and the trigger endpoint.

use async_trait::async_trait;
use keeper_core::{ChainId, SyncCategory};
use tokio_util::sync::CancellationToken;

use crate::{ChangeEvent, EntityState, SyncCheckpoint, SyncResult};

/// Reads chain head information.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the most recent block the node knows about.
    async fn latest_block(&self, chain: &ChainId) -> SyncResult<u64>;
}

/// Finds entities that changed within a block range.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Events for `[from, to]` (inclusive). May contain duplicates.
    async fn find_changed(&self, chain: &ChainId, from: u64, to: u64) -> SyncResult<Vec<ChangeEvent>>;
}

/// Applies changed entity ids to the data store.
///
/// Must be idempotent: a failed cycle is retried over the same window, so the
/// same batch can be applied more than once. Once `cancel` fires, nothing
/// further may be written.
#[async_trait]
pub trait IncrementalUpdater: Send + Sync {
    /// Refetch authoritative state for `entity_ids` and upsert it.
    /// Returns the number of entities written.
    async fn refetch_and_upsert(
        &self,
        category: SyncCategory,
        chain: &ChainId,
        entity_ids: &[String],
        cancel: &CancellationToken,
    ) -> SyncResult<usize>;
}

/// Reads the authoritative state of entities, e.g. through contract calls.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Returns [`SyncError::Cancelled`](crate::SyncError::Cancelled) instead of
    /// issuing further requests once `cancel` fires.
    async fn fetch(
        &self,
        chain: &ChainId,
        entity_ids: &[String],
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<EntityState>>;
}

/// Durable `(category, chain) -> block` map.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored block, or `None` if this pair has never completed a cycle.
    async fn get(&self, category: SyncCategory, chain: &ChainId) -> SyncResult<Option<u64>>;

    /// Upsert the block for this pair. A value lower than the stored one is ignored.
    async fn set(&self, category: SyncCategory, chain: &ChainId, block: u64) -> SyncResult<()>;

    /// Every stored checkpoint.
    async fn list(&self) -> SyncResult<Vec<SyncCheckpoint>>;
}

//! `keeper-sync`: incremental, checkpointed chain synchronization.
//!
//! A [`ChainSynchronizer`] owns one `(category, chain)` pipeline: it reads the
//! stored checkpoint, scans a capped block window for changed entities,
//! refetches them in batches and only then advances the checkpoint.
//! [`SyncJob`] exposes pipelines to the scheduler as a chain-scoped job.

pub mod checkpoint;
pub mod db;
pub mod error;
pub mod job;
pub mod rpc;
pub mod synchronizer;
pub mod traits;
pub mod types;
pub mod updater;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use checkpoint::{MemoryCheckpointStore, SqliteCheckpointStore};
pub use error::{SyncError, SyncResult};
pub use job::SyncJob;
pub use rpc::{JsonRpcClient, LogChangeDetector, RpcChainClient, RpcEntitySource};
pub use synchronizer::{ChainSynchronizer, SyncSettings};
pub use traits::{ChainClient, ChangeDetector, CheckpointStore, EntitySource, IncrementalUpdater};
pub use types::{BlockWindow, ChangeEvent, EntityState, SyncCheckpoint, SyncReport};
pub use updater::SqliteEntityUpdater;

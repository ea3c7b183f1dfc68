use keeper_core::{ChainId, SyncCategory};
use serde::{Deserialize, Serialize};

/// An entity touched at a given block, as reported by a change detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: String,
    pub block: u64,
}

impl ChangeEvent {
    pub fn new(entity_id: &str, block: u64) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            block,
        }
    }
}

/// A stored "last processed block" for one category on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub category: SyncCategory,
    pub chain: ChainId,
    pub block_number: u64,
    /// RFC 3339 timestamp of the last advance.
    pub updated_at: String,
}

/// Inclusive block range scanned by one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockWindow {
    pub from: u64,
    pub to: u64,
}

impl BlockWindow {
    /// The window following `checkpoint`, capped at `max_blocks` and `latest`.
    ///
    /// Returns `None` when the chain has not moved past the checkpoint.
    pub fn after(checkpoint: u64, latest: u64, max_blocks: u64) -> Option<Self> {
        if checkpoint >= latest {
            return None;
        }
        Some(Self {
            from: checkpoint + 1,
            to: latest.min(checkpoint.saturating_add(max_blocks)),
        })
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// What one sync cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// `None` when the chain had not advanced.
    pub window: Option<BlockWindow>,
    /// Distinct entities refetched and upserted.
    pub touched: usize,
    pub batches: usize,
    /// Checkpoint after the cycle.
    pub checkpoint: u64,
}

/// Authoritative state of one entity, as written to the data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: serde_json::Value,
    /// Block the state was read at, when the source knows it.
    pub block: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_capped_by_max_blocks() {
        let w = BlockWindow::after(100, 3_000, 2_000).unwrap();
        assert_eq!(w, BlockWindow { from: 101, to: 2_100 });
        assert_eq!(w.len(), 2_000);
    }

    #[test]
    fn window_is_capped_by_latest() {
        let w = BlockWindow::after(100, 150, 2_000).unwrap();
        assert_eq!(w, BlockWindow { from: 101, to: 150 });
    }

    #[test]
    fn no_window_when_caught_up() {
        assert!(BlockWindow::after(100, 100, 2_000).is_none());
        assert!(BlockWindow::after(120, 100, 2_000).is_none());
    }
}

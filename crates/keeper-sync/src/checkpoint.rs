use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use keeper_core::{ChainId, SyncCategory};
use rusqlite::Connection;
use tracing::debug;

use crate::{db::init_db, CheckpointStore, SyncCheckpoint, SyncError, SyncResult};

/// Checkpoints persisted in the `sync_checkpoints` table.
///
/// Uses its own `Connection` so it never contends with the entity updater.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    pub fn new(conn: Connection) -> SyncResult<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_sql_block(block: u64) -> SyncResult<i64> {
    i64::try_from(block)
        .map_err(|_| SyncError::InvalidConfig(format!("block {block} exceeds storage range")))
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, category: SyncCategory, chain: &ChainId) -> SyncResult<Option<u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT block_number FROM sync_checkpoints WHERE category = ?1 AND chain = ?2",
        )?;
        let mut rows = stmt.query(rusqlite::params![category.as_str(), chain.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, i64>(0)? as u64)),
            None => Ok(None),
        }
    }

    async fn set(&self, category: SyncCategory, chain: &ChainId, block: u64) -> SyncResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        // The WHERE clause keeps the stored value non-decreasing even if a late
        // writer shows up with an older block.
        let n = conn.execute(
            "INSERT INTO sync_checkpoints (category, chain, block_number, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (category, chain) DO UPDATE
                SET block_number = excluded.block_number,
                    updated_at   = excluded.updated_at
              WHERE excluded.block_number >= sync_checkpoints.block_number",
            rusqlite::params![category.as_str(), chain.as_str(), to_sql_block(block)?, now],
        )?;
        if n == 0 {
            debug!(%category, %chain, block, "ignored checkpoint regression");
        }
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<SyncCheckpoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT category, chain, block_number, updated_at
             FROM sync_checkpoints ORDER BY chain, category",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?, // category
                    row.get::<_, String>(1)?, // chain
                    row.get::<_, i64>(2)?,    // block_number
                    row.get::<_, String>(3)?, // updated_at
                ))
            })?
            .filter_map(|r| {
                let (category, chain, block, updated_at) = r.ok()?;
                Some(SyncCheckpoint {
                    category: category.parse().ok()?,
                    chain: ChainId::from(chain),
                    block_number: block as u64,
                    updated_at,
                })
            })
            .collect();
        Ok(rows)
    }
}

/// Process-local checkpoints. Lost on restart; meant for tests and dry runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<(SyncCategory, ChainId), (u64, String)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, category: SyncCategory, chain: &ChainId) -> SyncResult<Option<u64>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&(category, chain.clone())).map(|(b, _)| *b))
    }

    async fn set(&self, category: SyncCategory, chain: &ChainId, block: u64) -> SyncResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry((category, chain.clone()))
            .or_insert((0, String::new()));
        if block >= entry.0 {
            *entry = (block, Utc::now().to_rfc3339());
        }
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<SyncCheckpoint>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<SyncCheckpoint> = entries
            .iter()
            .map(|((category, chain), (block, updated_at))| SyncCheckpoint {
                category: *category,
                chain: chain.clone(),
                block_number: *block,
                updated_at: updated_at.clone(),
            })
            .collect();
        out.sort_by(|a, b| {
            (a.chain.as_str(), a.category.as_str()).cmp(&(b.chain.as_str(), b.category.as_str()))
        });
        Ok(out)
    }
}

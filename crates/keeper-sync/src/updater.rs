use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use keeper_core::{ChainId, SyncCategory};
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{db::init_db, EntitySource, EntityState, IncrementalUpdater, SyncError, SyncResult};

/// Refetches entities from an [`EntitySource`] and upserts them into
/// `synced_entities`. Re-applying a batch overwrites rows with the same key,
/// unless the stored row was read at a later block than the incoming one.
pub struct SqliteEntityUpdater<S> {
    source: S,
    conn: Arc<Mutex<Connection>>,
}

impl<S: EntitySource> SqliteEntityUpdater<S> {
    pub fn new(source: S, conn: Connection) -> SyncResult<Self> {
        init_db(&conn)?;
        Ok(Self {
            source,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Stored snapshot of one entity.
    pub fn entity(
        &self,
        category: SyncCategory,
        chain: &ChainId,
        entity_id: &str,
    ) -> SyncResult<Option<EntityState>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare_cached(
            "SELECT state, block FROM synced_entities
             WHERE category = ?1 AND chain = ?2 AND entity_id = ?3",
        )?;
        let mut rows = stmt.query(rusqlite::params![category.as_str(), chain.as_str(), entity_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let state: String = row.get(0)?;
        let block: Option<i64> = row.get(1)?;
        Ok(Some(EntityState {
            entity_id: entity_id.to_string(),
            state: serde_json::from_str(&state)?,
            block: block.map(|b| b as u64),
        }))
    }

    /// Returns the number of rows actually written; stale states are skipped.
    fn upsert(&self, category: SyncCategory, chain: &ChainId, states: &[EntityState]) -> SyncResult<usize> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO synced_entities (category, chain, entity_id, state, block, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (category, chain, entity_id) DO UPDATE
                    SET state = excluded.state,
                        block = excluded.block,
                        updated_at = excluded.updated_at
                    WHERE excluded.block IS NULL
                       OR synced_entities.block IS NULL
                       OR excluded.block >= synced_entities.block",
            )?;
            for s in states {
                written += stmt.execute(rusqlite::params![
                    category.as_str(),
                    chain.as_str(),
                    s.entity_id,
                    serde_json::to_string(&s.state)?,
                    s.block.map(|b| b as i64),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }
}

#[async_trait]
impl<S: EntitySource> IncrementalUpdater for SqliteEntityUpdater<S> {
    async fn refetch_and_upsert(
        &self,
        category: SyncCategory,
        chain: &ChainId,
        entity_ids: &[String],
        cancel: &CancellationToken,
    ) -> SyncResult<usize> {
        let states = self.source.fetch(chain, entity_ids, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let written = self.upsert(category, chain, &states)?;
        if written < states.len() {
            debug!(%category, %chain, stale = states.len() - written, "older entity states skipped");
        }
        debug!(%category, %chain, requested = entity_ids.len(), written, "entities upserted");
        Ok(written)
    }
}

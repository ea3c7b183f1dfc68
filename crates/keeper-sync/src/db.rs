use rusqlite::Connection;

use crate::SyncResult;

/// Initialise the sync schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            category      TEXT    NOT NULL,
            chain         TEXT    NOT NULL,
            block_number  INTEGER NOT NULL CHECK (block_number >= 0),
            updated_at    TEXT    NOT NULL,
            PRIMARY KEY (category, chain)
        ) STRICT;

        -- One row per synced entity; upserts are keyed by (category, chain, entity_id).
        CREATE TABLE IF NOT EXISTS synced_entities (
            category    TEXT    NOT NULL,
            chain       TEXT    NOT NULL,
            entity_id   TEXT    NOT NULL,
            state       TEXT    NOT NULL,   -- JSON snapshot from the entity source
            block       INTEGER,            -- block the state was read at, if known
            updated_at  TEXT    NOT NULL,
            PRIMARY KEY (category, chain, entity_id)
        ) STRICT;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('sync_checkpoints', 'synced_entities')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
    }
}

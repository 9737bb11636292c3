use rusqlite::Connection;

/// SQL schema for the event log and sync-state tables
const SCHEMA: &str = r#"
-- Append-only sync event log. Rows are never edited or deleted during
-- normal operation; later events on the same resource_id supersede earlier
-- ones. Retention pruning only removes already-delivered rows.
CREATE TABLE IF NOT EXISTS sync_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,
    device_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    timestamp INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Delta queries filter by user and watermark, excluding the caller's device
CREATE INDEX IF NOT EXISTS idx_sync_events_user_time ON sync_events(user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_sync_events_status ON sync_events(status, timestamp);

-- Per (user, device) sync watermark
CREATE TABLE IF NOT EXISTS sync_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    last_sync_time INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(user_id, device_id)
);
"#;

/// Initialize the database with the sync schema
pub fn init_database(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_database() {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();

        // Verify tables exist
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"sync_events".to_string()));
        assert!(tables.contains(&"sync_states".to_string()));
    }

    #[test]
    fn test_init_database_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        init_database(&conn).unwrap();
    }
}

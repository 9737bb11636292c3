use chrono::{DateTime, Utc};
use marksync_core::{EventStatus, NewSyncEvent, SyncEvent, SyncState};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::sync::{Arc, Mutex};

/// Repository over the event log and sync-state tables.
///
/// Safe under unbounded concurrent callers: every write is a single atomic
/// insert or upsert, and the connection is serialized behind a mutex. The
/// durable store is the source of truth; nothing here is cached.
#[derive(Clone)]
pub struct SyncRepo {
    conn: Arc<Mutex<Connection>>,
}

impl SyncRepo {
    /// Create a new SyncRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    // ===== Event log operations =====

    /// Append an event to the log, assigning its id. The event is stored
    /// exactly as given; validation happens upstream.
    pub fn append_event(&self, event: &NewSyncEvent) -> Result<SyncEvent, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let payload = event.payload.to_string();

        conn.execute(
            "INSERT INTO sync_events
             (user_id, resource_type, resource_id, action, payload, device_id, status, timestamp, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.user_id,
                event.resource_type.as_str(),
                event.resource_id,
                event.action.as_str(),
                payload,
                event.device_id,
                EventStatus::Pending.as_str(),
                event.timestamp.timestamp_millis(),
                now.timestamp_millis(),
            ],
        )?;

        let id = conn.last_insert_rowid();

        Ok(SyncEvent {
            id,
            user_id: event.user_id.clone(),
            resource_type: event.resource_type,
            resource_id: event.resource_id.clone(),
            action: event.action,
            payload: event.payload.clone(),
            device_id: event.device_id.clone(),
            timestamp: event.timestamp,
            status: EventStatus::Pending,
            created_at: now,
        })
    }

    /// Events for a user newer than `since`, excluding those produced by
    /// `exclude_device`, ascending by timestamp then insertion id.
    pub fn query_events_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        exclude_device: &str,
    ) -> Result<Vec<SyncEvent>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, resource_type, resource_id, action, payload, device_id, status, timestamp, created_at
             FROM sync_events
             WHERE user_id = ? AND timestamp > ? AND device_id != ?
             ORDER BY timestamp ASC, id ASC",
        )?;

        let events = stmt
            .query_map(
                params![user_id, since.timestamp_millis(), exclude_device],
                event_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Mark events as delivered. Bookkeeping only: delta queries never
    /// filter on status, so a crash between respond and mark loses nothing.
    pub fn mark_delivered(&self, event_ids: &[i64]) -> Result<usize, rusqlite::Error> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; event_ids.len()].join(", ");
        let sql = format!(
            "UPDATE sync_events SET status = 'delivered' WHERE id IN ({})",
            placeholders
        );
        conn.execute(&sql, params_from_iter(event_ids.iter()))
    }

    /// Prune delivered events older than the cutoff. Pending events are
    /// never pruned regardless of age.
    pub fn prune_delivered_before(&self, cutoff: DateTime<Utc>) -> Result<usize, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sync_events WHERE status = 'delivered' AND timestamp < ?",
            [cutoff.timestamp_millis()],
        )
    }

    // ===== Sync state operations =====

    /// Get the sync state for a device. An unseen device reads as the epoch
    /// watermark, which forces a full sync on first contact.
    pub fn get_sync_state(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<SyncState, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT user_id, device_id, last_sync_time, updated_at
                 FROM sync_states WHERE user_id = ? AND device_id = ?",
                params![user_id, device_id],
                |row| {
                    Ok(SyncState {
                        user_id: row.get(0)?,
                        device_id: row.get(1)?,
                        last_sync_time: millis_to_datetime(2, row.get(2)?)?,
                        updated_at: millis_to_datetime(3, row.get(3)?)?,
                    })
                },
            )
            .optional()?;

        Ok(state.unwrap_or_else(|| SyncState::unseen(user_id, device_id)))
    }

    /// Upsert a device's watermark. Silently no-ops when `timestamp` is not
    /// newer than the stored value, tolerating out-of-order acknowledgements.
    /// Returns whether the watermark advanced.
    pub fn update_sync_state(
        &self,
        user_id: &str,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let changed = conn.execute(
            "INSERT INTO sync_states (user_id, device_id, last_sync_time, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, device_id) DO UPDATE SET
                 last_sync_time = excluded.last_sync_time,
                 updated_at = excluded.updated_at
             WHERE excluded.last_sync_time > sync_states.last_sync_time",
            params![user_id, device_id, timestamp.timestamp_millis(), now, now],
        )?;
        Ok(changed > 0)
    }
}

// ===== Helper functions =====

fn event_from_row(row: &Row<'_>) -> Result<SyncEvent, rusqlite::Error> {
    let resource_type: String = row.get(2)?;
    let action: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let status: String = row.get(7)?;

    Ok(SyncEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        resource_type: resource_type
            .parse()
            .map_err(|e| column_error(2, e))?,
        resource_id: row.get(3)?,
        action: action.parse().map_err(|e| column_error(4, e))?,
        payload: serde_json::from_str(&payload).map_err(|e| column_error(5, e))?,
        device_id: row.get(6)?,
        status: status.parse().map_err(|e| column_error(7, e))?,
        timestamp: millis_to_datetime(8, row.get(8)?)?,
        created_at: millis_to_datetime(9, row.get(9)?)?,
    })
}

fn column_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

/// Convert a stored unix-millisecond column to DateTime<Utc>. An
/// out-of-range value is corrupt data and surfaces as a decode error,
/// never a fabricated timestamp.
fn millis_to_datetime(index: usize, millis: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

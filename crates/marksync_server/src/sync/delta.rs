//! Delta computation: the minimal correct event batch for a reconnecting
//! device, derived purely from its watermark.

use crate::db::SyncRepo;
use chrono::{DateTime, Utc};
use marksync_core::{SyncEvent, optimize};

/// Result of a delta computation
#[derive(Debug, Clone)]
pub struct Delta {
    /// Optimized events the device is missing, one per touched resource
    pub events: Vec<SyncEvent>,
    /// New watermark: max timestamp among returned events, or the request's
    /// `since` unchanged when the batch is empty
    pub watermark: DateTime<Utc>,
}

/// Computes events-since-watermark for a device, excluding its own events
/// and collapsing redundant chains. Idempotent: repeated calls with the same
/// `since` and no intervening writes return identical batches.
#[derive(Clone)]
pub struct DeltaEngine {
    repo: SyncRepo,
}

impl DeltaEngine {
    pub fn new(repo: SyncRepo) -> Self {
        Self { repo }
    }

    pub fn compute_delta(
        &self,
        user_id: &str,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Delta, rusqlite::Error> {
        let raw = self.repo.query_events_since(user_id, since, device_id)?;
        let events = optimize(raw);
        let watermark = events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(since);

        Ok(Delta { events, watermark })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use chrono::TimeZone;
    use marksync_core::{NewSyncEvent, ResourceType, SyncAction};
    use rusqlite::Connection;
    use serde_json::json;

    fn setup() -> (SyncRepo, DeltaEngine) {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = SyncRepo::new(conn);
        let engine = DeltaEngine::new(repo.clone());
        (repo, engine)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn append(repo: &SyncRepo, device: &str, resource: &str, action: SyncAction, secs: i64) {
        repo.append_event(&NewSyncEvent {
            user_id: "u1".to_string(),
            resource_type: ResourceType::Bookmark,
            resource_id: resource.to_string(),
            action,
            payload: json!({"at": secs}),
            device_id: device.to_string(),
            timestamp: at(secs),
        })
        .unwrap();
    }

    #[test]
    fn test_first_sync_returns_create_from_other_device() {
        // Device A creates B1; device B has never synced
        let (repo, engine) = setup();
        append(&repo, "device-a", "b1", SyncAction::Create, 100);

        let delta = engine
            .compute_delta("u1", "device-b", DateTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(delta.events.len(), 1);
        assert_eq!(delta.events[0].action, SyncAction::Create);
        assert_eq!(delta.events[0].resource_id, "b1");
        assert_eq!(delta.watermark, at(100));
    }

    #[test]
    fn test_deleted_resource_yields_only_the_delete() {
        // Create, update, delete before the other device ever syncs
        let (repo, engine) = setup();
        append(&repo, "device-a", "b1", SyncAction::Create, 100);
        append(&repo, "device-a", "b1", SyncAction::Update, 200);
        append(&repo, "device-a", "b1", SyncAction::Delete, 300);

        let delta = engine
            .compute_delta("u1", "device-b", DateTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(delta.events.len(), 1);
        assert_eq!(delta.events[0].action, SyncAction::Delete);
        assert_eq!(delta.watermark, at(300));
    }

    #[test]
    fn test_own_events_are_never_returned() {
        let (repo, engine) = setup();
        append(&repo, "device-b", "b1", SyncAction::Create, 100);
        append(&repo, "device-a", "b2", SyncAction::Create, 200);

        let delta = engine
            .compute_delta("u1", "device-b", DateTime::UNIX_EPOCH)
            .unwrap();
        assert!(delta.events.iter().all(|e| e.device_id != "device-b"));
        assert_eq!(delta.events.len(), 1);
    }

    #[test]
    fn test_compute_delta_is_idempotent() {
        let (repo, engine) = setup();
        append(&repo, "device-a", "b1", SyncAction::Create, 100);
        append(&repo, "device-a", "b2", SyncAction::Update, 200);

        let first = engine
            .compute_delta("u1", "device-b", DateTime::UNIX_EPOCH)
            .unwrap();
        let second = engine
            .compute_delta("u1", "device-b", DateTime::UNIX_EPOCH)
            .unwrap();

        let ids =
            |d: &Delta| d.events.iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.watermark, second.watermark);
    }

    #[test]
    fn test_empty_batch_keeps_watermark_unchanged() {
        let (_repo, engine) = setup();
        let delta = engine.compute_delta("u1", "device-b", at(500)).unwrap();
        assert!(delta.events.is_empty());
        assert_eq!(delta.watermark, at(500));
    }

    #[test]
    fn test_concurrent_edits_converge_to_later_timestamp() {
        // Device X renames at t=150, device Y at t=151; everyone gets Y's
        let (repo, engine) = setup();
        append(&repo, "device-x", "c1", SyncAction::Update, 150);
        append(&repo, "device-y", "c1", SyncAction::Update, 151);

        let delta = engine
            .compute_delta("u1", "device-z", DateTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(delta.events.len(), 1);
        assert_eq!(delta.events[0].device_id, "device-y");
        assert_eq!(delta.watermark, at(151));
    }
}

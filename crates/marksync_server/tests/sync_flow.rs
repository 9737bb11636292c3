//! End-to-end sync flows over the service, hub and event log together:
//! first-contact full sync, delta-only resync, concurrent-edit convergence,
//! and recovery after a force-closed slow session.

use chrono::{DateTime, TimeZone, Utc};
use marksync_server::db::{SyncRepo, init_database};
use marksync_server::sync::{
    ClientMessage, Hub, HubHandle, IncomingEvent, LocalBridge, ServerMessage, SessionContext,
    SessionHandle, SyncService,
};
use marksync_core::{ResourceType, SyncAction};
use rusqlite::Connection;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn setup() -> (SyncService, HubHandle) {
    let conn = Connection::open_in_memory().unwrap();
    init_database(&conn).unwrap();
    let repo = SyncRepo::new(conn);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    std::mem::forget(shutdown_tx);
    let (hub, handle) = Hub::new(shutdown_rx);
    tokio::spawn(hub.run());

    let service = SyncService::new(
        repo,
        handle.clone(),
        Arc::new(LocalBridge::new()),
        marksync_core::DEFAULT_MAX_PAYLOAD_BYTES,
    );
    (service, handle)
}

fn ctx(user: &str, device: &str) -> SessionContext {
    SessionContext {
        session_id: format!("session-{device}"),
        user_id: user.to_string(),
        device_id: device.to_string(),
    }
}

async fn send_event(
    service: &SyncService,
    session: &SessionContext,
    resource_type: ResourceType,
    resource: &str,
    action: SyncAction,
    changes: serde_json::Value,
    secs: i64,
) {
    let reply = service
        .handle_sync_message(
            session,
            ClientMessage::SyncEvent(IncomingEvent {
                event_type: action,
                resource_type,
                resource_id: resource.to_string(),
                changes,
                device_id: None,
                timestamp: Some(at(secs)),
            }),
        )
        .await;
    assert!(matches!(
        reply,
        Some(ServerMessage::SyncEventAck { status: "received" })
    ));
}

async fn sync_request(
    service: &SyncService,
    session: &SessionContext,
    since: DateTime<Utc>,
) -> (Vec<marksync_core::SyncEvent>, DateTime<Utc>) {
    match service
        .handle_sync_message(session, ClientMessage::SyncRequest { last_sync_time: since })
        .await
    {
        Some(ServerMessage::SyncResponse {
            events,
            last_sync_timestamp,
        }) => (events, last_sync_timestamp),
        other => panic!("expected sync_response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_never_synced_device_receives_full_history() {
    // Device A creates bookmark B1 at t=100; device B has never synced
    let (service, _) = setup();
    let device_a = ctx("u1", "device-a");
    let device_b = ctx("u1", "device-b");

    send_event(
        &service,
        &device_a,
        ResourceType::Bookmark,
        "b1",
        SyncAction::Create,
        json!({"url": "https://rust-lang.org", "title": "Rust"}),
        100,
    )
    .await;

    let (events, watermark) = sync_request(&service, &device_b, DateTime::UNIX_EPOCH).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, SyncAction::Create);
    assert_eq!(events[0].resource_id, "b1");
    assert_eq!(watermark, at(100));

    // Device is now in the synced state: the same watermark yields nothing
    let (events, watermark) = sync_request(&service, &device_b, watermark).await;
    assert!(events.is_empty());
    assert_eq!(watermark, at(100));
}

#[tokio::test]
async fn test_update_then_delete_collapses_to_the_delete() {
    // Device A updates B1 at t=200 and deletes it at t=300 before device B
    // ever syncs
    let (service, _) = setup();
    let device_a = ctx("u1", "device-a");
    let device_b = ctx("u1", "device-b");

    send_event(
        &service,
        &device_a,
        ResourceType::Bookmark,
        "b1",
        SyncAction::Create,
        json!({"title": "v1"}),
        100,
    )
    .await;
    send_event(
        &service,
        &device_a,
        ResourceType::Bookmark,
        "b1",
        SyncAction::Update,
        json!({"title": "v2"}),
        200,
    )
    .await;
    send_event(
        &service,
        &device_a,
        ResourceType::Bookmark,
        "b1",
        SyncAction::Delete,
        json!({}),
        300,
    )
    .await;

    let (events, watermark) = sync_request(&service, &device_b, DateTime::UNIX_EPOCH).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, SyncAction::Delete);
    assert_eq!(watermark, at(300));
}

#[tokio::test]
async fn test_concurrent_renames_converge_everywhere() {
    // Device X renames collection C1 at t=150, device Y at t=151. Every
    // other device must converge to Y's name.
    let (service, _) = setup();
    let device_x = ctx("u1", "device-x");
    let device_y = ctx("u1", "device-y");
    let device_z = ctx("u1", "device-z");

    send_event(
        &service,
        &device_x,
        ResourceType::Collection,
        "c1",
        SyncAction::Update,
        json!({"name": "Work"}),
        150,
    )
    .await;
    send_event(
        &service,
        &device_y,
        ResourceType::Collection,
        "c1",
        SyncAction::Update,
        json!({"name": "Projects"}),
        151,
    )
    .await;

    let (events, _) = sync_request(&service, &device_z, DateTime::UNIX_EPOCH).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, json!({"name": "Projects"}));

    // X itself converges too: its delta excludes its own event and carries
    // only Y's
    let (events, _) = sync_request(&service, &device_x, DateTime::UNIX_EPOCH).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].device_id, "device-y");
    assert_eq!(events[0].payload, json!({"name": "Projects"}));
}

#[tokio::test]
async fn test_force_closed_session_recovers_via_sync_request() {
    // A slow session with a tiny outbound buffer gets force-closed by the
    // hub mid-stream; after reconnecting, one sync_request returns every
    // event it missed.
    let (service, hub) = setup();
    let device_a = ctx("u1", "device-a");
    let device_b = ctx("u1", "device-b");

    let (out_tx, _out_rx) = mpsc::channel(1);
    let (cancel_tx, mut cancelled) = watch::channel(false);
    hub.register(SessionHandle::new(
        "u1".to_string(),
        "device-b".to_string(),
        out_tx,
        Arc::new(cancel_tx),
    ))
    .await;

    // Nobody drains the queue, so the pushes past the first overflow it
    for (resource, secs) in [("b1", 100), ("b2", 200), ("b3", 300)] {
        send_event(
            &service,
            &device_a,
            ResourceType::Bookmark,
            resource,
            SyncAction::Create,
            json!({"at": secs}),
            secs,
        )
        .await;
    }
    hub.stats().await.unwrap();

    cancelled.changed().await.unwrap();
    assert!(*cancelled.borrow());
    assert_eq!(hub.stats().await.unwrap().active_sessions, 0);

    // Reconnect and request a delta from the last acknowledged watermark:
    // nothing is lost
    let (events, watermark) = sync_request(&service, &device_b, DateTime::UNIX_EPOCH).await;
    let mut resources: Vec<&str> = events.iter().map(|e| e.resource_id.as_str()).collect();
    resources.sort_unstable();
    assert_eq!(resources, vec!["b1", "b2", "b3"]);
    assert_eq!(watermark, at(300));
}

#[tokio::test]
async fn test_watermark_only_moves_forward_across_requests() {
    let (service, _) = setup();
    let device_a = ctx("u1", "device-a");
    let device_b = ctx("u1", "device-b");

    send_event(
        &service,
        &device_a,
        ResourceType::Bookmark,
        "b1",
        SyncAction::Create,
        json!({}),
        500,
    )
    .await;

    sync_request(&service, &device_b, DateTime::UNIX_EPOCH).await;
    let advanced = service
        .repo()
        .get_sync_state("u1", "device-b")
        .unwrap()
        .last_sync_time;
    assert_eq!(advanced, at(500));

    // A stale request replays old events but cannot move the stored
    // watermark backwards
    sync_request(&service, &device_b, at(100)).await;
    let state = service.repo().get_sync_state("u1", "device-b").unwrap();
    assert_eq!(state.last_sync_time, at(500));
}

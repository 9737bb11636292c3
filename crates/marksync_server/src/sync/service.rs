//! Sync service: the orchestrator tying the event log, delta engine, hub
//! and bridge together, and the protocol-level dispatch for inbound
//! messages.

use crate::db::SyncRepo;
use crate::error::SyncError;
use crate::sync::bridge::EventBridge;
use crate::sync::delta::DeltaEngine;
use crate::sync::hub::HubHandle;
use crate::sync::protocol::{ClientMessage, IncomingEvent, ServerMessage};
use crate::sync::session::SessionContext;
use chrono::Utc;
use marksync_core::{NewSyncEvent, SyncEvent};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SyncService {
    repo: SyncRepo,
    delta: DeltaEngine,
    hub: HubHandle,
    bridge: Arc<dyn EventBridge>,
    max_payload_bytes: usize,
}

impl SyncService {
    pub fn new(
        repo: SyncRepo,
        hub: HubHandle,
        bridge: Arc<dyn EventBridge>,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            delta: DeltaEngine::new(repo.clone()),
            repo,
            hub,
            bridge,
            max_payload_bytes,
        }
    }

    pub fn repo(&self) -> &SyncRepo {
        &self.repo
    }

    /// Record a mutation in the event log and fan it out: published on the
    /// cross-instance bridge, pushed to the user's other live sessions.
    /// Called for relayed client events and by the domain layer after every
    /// committed bookmark/collection change.
    pub async fn create_sync_event(&self, event: NewSyncEvent) -> Result<SyncEvent, SyncError> {
        event.validate(self.max_payload_bytes)?;

        let stored = self.repo.append_event(&event)?;
        debug!(
            "Event appended: id={}, user={}, resource={}, action={}",
            stored.id, stored.user_id, stored.resource_id, stored.action
        );

        // The event is durable at this point; degraded fan-out is recovered
        // by the next sync_request, so neither failure below is surfaced.
        if let Err(e) = self.bridge.publish(&stored).await {
            warn!("Bridge publish failed for event {}: {}", stored.id, e);
        }
        self.hub
            .broadcast_to_user(
                &stored.user_id,
                Some(&stored.device_id),
                ServerMessage::SyncEvent(stored.clone()),
            )
            .await;

        Ok(stored)
    }

    /// Protocol dispatch for one inbound message. Returns the reply to send
    /// on the same session, if any. Never terminates the connection.
    pub async fn handle_sync_message(
        &self,
        session: &SessionContext,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        match message {
            ClientMessage::Ping => Some(ServerMessage::Pong),
            // Pongs only feed the session's read deadline
            ClientMessage::Pong => None,
            ClientMessage::SyncRequest { last_sync_time } => {
                Some(self.handle_sync_request(session, last_sync_time).await)
            }
            ClientMessage::SyncEvent(event) => Some(self.handle_client_event(session, event).await),
            ClientMessage::Unknown(received_type) => Some(ServerMessage::Error {
                error: "unknown_message_type".to_string(),
                received_type: Some(received_type),
            }),
        }
    }

    async fn handle_sync_request(
        &self,
        session: &SessionContext,
        last_sync_time: chrono::DateTime<Utc>,
    ) -> ServerMessage {
        let delta = match self
            .delta
            .compute_delta(&session.user_id, &session.device_id, last_sync_time)
        {
            Ok(delta) => delta,
            Err(e) => {
                warn!(
                    "Delta computation failed: user={}, device={}: {}",
                    session.user_id, session.device_id, e
                );
                return transient_error("sync_request");
            }
        };

        // Monotonic guard makes this safe even for stale or empty batches
        if let Err(e) =
            self.repo
                .update_sync_state(&session.user_id, &session.device_id, delta.watermark)
        {
            warn!(
                "Sync state update failed: user={}, device={}: {}",
                session.user_id, session.device_id, e
            );
        }

        let ids: Vec<i64> = delta.events.iter().map(|e| e.id).collect();
        if let Err(e) = self.repo.mark_delivered(&ids) {
            warn!("Failed to mark events delivered: {}", e);
        }

        debug!(
            "Delta delivered: user={}, device={}, events={}, watermark={}",
            session.user_id,
            session.device_id,
            delta.events.len(),
            delta.watermark
        );

        ServerMessage::SyncResponse {
            events: delta.events,
            last_sync_timestamp: delta.watermark,
        }
    }

    async fn handle_client_event(
        &self,
        session: &SessionContext,
        event: IncomingEvent,
    ) -> ServerMessage {
        let new_event = NewSyncEvent {
            user_id: session.user_id.clone(),
            resource_type: event.resource_type,
            resource_id: event.resource_id,
            action: event.event_type,
            payload: event.changes,
            device_id: event
                .device_id
                .unwrap_or_else(|| session.device_id.clone()),
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
        };

        match self.create_sync_event(new_event).await {
            Ok(_) => ServerMessage::SyncEventAck { status: "received" },
            Err(e) if e.is_transient() => {
                warn!(
                    "Failed to store client event: user={}, device={}: {}",
                    session.user_id, session.device_id, e
                );
                transient_error("sync_event")
            }
            // Validation failures are the caller's fault; retrying the same
            // event cannot succeed, so the message names the actual problem.
            Err(e) => ServerMessage::Error {
                error: e.to_string(),
                received_type: Some("sync_event".to_string()),
            },
        }
    }
}

/// Retryable failure response; the client is expected to retry its
/// sync_request.
fn transient_error(received_type: &str) -> ServerMessage {
    ServerMessage::Error {
        error: "sync_failed".to_string(),
        received_type: Some(received_type.to_string()),
    }
}

use crate::sync::{HubHandle, SessionSettings, SyncService, run_session};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Query parameters for the WebSocket handshake. Identity may also arrive
/// via the `x-user-id` / `x-device-id` headers.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
}

/// Shared state for the WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub service: Arc<SyncService>,
    pub hub: HubHandle,
    pub settings: SessionSettings,
}

/// WebSocket upgrade handler. The auth layer has already validated the
/// identity; missing user or device id rejects the upgrade before any
/// session is created.
pub async fn ws_handler(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = query
        .user_id
        .filter(|s| !s.is_empty())
        .or_else(|| header_string(&headers, "x-user-id"));
    let device_id = query
        .device_id
        .filter(|s| !s.is_empty())
        .or_else(|| header_string(&headers, "x-device-id"));

    let (user_id, device_id) = match (user_id, device_id) {
        (Some(u), Some(d)) => (u, d),
        _ => {
            warn!("WebSocket connection rejected: missing user_id or device_id");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    info!("WebSocket upgrade: user={}, device={}", user_id, device_id);

    let service = state.service.clone();
    let hub = state.hub.clone();
    let settings = state.settings.clone();

    ws.on_upgrade(move |socket| run_session(socket, service, hub, user_id, device_id, settings))
        .into_response()
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

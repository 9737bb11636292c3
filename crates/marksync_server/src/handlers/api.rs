use crate::sync::{HubHandle, HubStats};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

/// Shared state for the API routes
#[derive(Clone)]
pub struct ApiState {
    pub hub: HubHandle,
}

/// Build the `/api` router
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .with_state(state)
}

async fn get_stats(State(state): State<ApiState>) -> impl IntoResponse {
    match state.hub.stats().await {
        Some(stats) => Json(stats).into_response(),
        // Hub is gone only during shutdown
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(HubStats::default())).into_response(),
    }
}

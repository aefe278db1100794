use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::event::EventKind;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub backend: &'static str,
    pub active_sessions: usize,
    pub unique_users: usize,
}

/// Producer payload handed over by the CRM collaborator after it has
/// persisted the notification row.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub user_id: i64,
    #[serde(default = "default_event_kind")]
    pub event_type: EventKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_event_kind() -> EventKind {
    EventKind::Notification
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let registry = state.broker.stats();

    Json(StatsResponse {
        backend: state.broker.backend_name(),
        active_sessions: registry.active_sessions,
        unique_users: registry.unique_users,
    })
}

/// `POST /internal/notifications` — hand a `(user_id, event_type, data)`
/// triple to the broker. Delivery is best-effort, so this always accepts.
#[tracing::instrument(
    name = "api.publish",
    skip(state, request),
    fields(user_id = request.user_id, event_type = %request.event_type)
)]
pub async fn publish_notification(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> (StatusCode, Json<PublishResponse>) {
    state
        .broker
        .publish(request.user_id, request.event_type, request.data)
        .await;

    (StatusCode::ACCEPTED, Json(PublishResponse { status: "accepted" }))
}

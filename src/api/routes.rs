use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};
use crate::sse::stream_handler;

use super::handlers::{health, publish_notification, stats};

pub fn api_routes(state: AppState) -> Router<AppState> {
    // Producer surface for sibling processes; guarded by X-API-Key when
    // one is configured.
    let internal = Router::new()
        .route("/internal/notifications", post(publish_notification))
        .route_layer(middleware::from_fn_with_state(state, api_key_auth));

    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Consumer entry point
        .route("/notifications/stream", get(stream_handler))
        .merge(internal)
}

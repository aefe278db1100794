//! SSE endpoint handler.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::server::AppState;

use super::session::session_stream;

/// Query parameters for the stream endpoint.
///
/// The browser `EventSource` API cannot set custom headers, so the token
/// may arrive as a query parameter instead of an `Authorization` header.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// `GET /notifications/stream`
#[tracing::instrument(
    name = "sse.connect",
    skip(state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = extract_token(&query, &headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing authentication token").into_response();
    };

    let claims = match state.jwt_validator.validate(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "JWT validation failed");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    let user_id = claims.user_id;
    tracing::info!(user_id = user_id, "SSE connection requested");

    let subscription = state.broker.subscribe(user_id).await;
    let stream = session_stream(
        state.broker.clone(),
        subscription,
        state.settings.stream.clone(),
    );

    let response_headers = [
        (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
        (header::CONNECTION, "keep-alive"),
    ];

    (response_headers, Body::from_stream(stream)).into_response()
}

/// Extract token from query parameter or Authorization header.
fn extract_token(query: &StreamQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

//! Stream session: turns a broker subscription into SSE frames.
//!
//! State machine: CONNECTED (synthetic handshake event) -> STREAMING
//! (queue reads interleaved with pings and heartbeats) -> TERMINATED
//! (client disconnect or unrecoverable encode error). Every exit path
//! unsubscribes exactly once via the drop guard, including transport-level
//! cancellation where the stream future is simply dropped.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use chrono::Utc;
use futures::stream::Stream;
use serde_json::json;
use uuid::Uuid;

use crate::broker::{Broker, Subscription};
use crate::config::StreamConfig;
use crate::event::EventKind;

use super::encoder::FrameEncoder;

/// Build the frame stream for one subscribed session.
pub fn session_stream(
    broker: Arc<Broker>,
    subscription: Subscription,
    config: StreamConfig,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let Subscription {
        user_id,
        session_id,
        queue,
    } = subscription;

    // Created before the stream body, which runs only once the response
    // body is first polled. A connection torn down before that still drops
    // the guard and releases the subscription.
    let guard = UnsubscribeGuard::new(broker, user_id, session_id);

    async_stream::stream! {
        let _guard = guard;

        let mut encoder = FrameEncoder::new(config.retry_ms);

        let hello = json!({
            "message": "Connected to notification stream",
            "user_id": user_id,
        });
        match encoder.encode(EventKind::Connected, &hello) {
            Ok(frame) => yield Ok(Bytes::from(frame)),
            Err(e) => {
                tracing::error!(user_id = user_id, error = %e, "Failed to encode handshake");
                return;
            }
        }

        let poll_interval = config.poll_interval();
        let ping_interval = config.ping_interval();
        let heartbeat_interval = config.heartbeat_interval();
        let mut last_ping = Instant::now();
        let mut last_heartbeat = Instant::now();

        loop {
            match queue.recv_timeout(poll_interval).await {
                Some(event) => {
                    match encoder.encode(event.kind, &event.data) {
                        Ok(frame) => yield Ok(Bytes::from(frame)),
                        Err(e) => {
                            tracing::error!(
                                user_id = user_id,
                                session_id = %session_id,
                                error = %e,
                                "Failed to encode event, terminating session"
                            );
                            let detail = json!({"error": e.to_string()});
                            if let Ok(frame) = encoder.encode(EventKind::Error, &detail) {
                                yield Ok(Bytes::from(frame));
                            }
                            break;
                        }
                    }
                }
                None => {
                    let now = Instant::now();
                    if now.duration_since(last_ping) >= ping_interval {
                        let data = json!({"message": "keep-alive"});
                        if let Ok(frame) = encoder.encode(EventKind::Ping, &data) {
                            yield Ok(Bytes::from(frame));
                        }
                        last_ping = now;
                    }
                    if now.duration_since(last_heartbeat) >= heartbeat_interval {
                        yield Ok(Bytes::from(FrameEncoder::heartbeat(Utc::now().timestamp())));
                        last_heartbeat = now;
                    }
                }
            }
        }
    }
}

/// Guarantees the subscription is released on every termination path.
struct UnsubscribeGuard {
    broker: Arc<Broker>,
    user_id: i64,
    session_id: Uuid,
}

impl UnsubscribeGuard {
    fn new(broker: Arc<Broker>, user_id: i64, session_id: Uuid) -> Self {
        Self {
            broker,
            user_id,
            session_id,
        }
    }
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        tracing::info!(
            user_id = self.user_id,
            session_id = %self.session_id,
            "Stream session closed"
        );

        // Unsubscribe is async (it may join a relay task), so hand it off.
        let broker = self.broker.clone();
        let user_id = self.user_id;
        let session_id = self.session_id;
        tokio::spawn(async move {
            broker.unsubscribe(user_id, session_id).await;
        });
    }
}

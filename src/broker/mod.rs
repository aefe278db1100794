//! Per-user publish/subscribe broker.
//!
//! The broker is an explicit instance constructed once at startup and
//! shared through application state; it owns the session registry and
//! delegates delivery to the backend selected at construction. Producers
//! call [`Broker::publish`] after the notification row has been persisted
//! upstream; delivery is best-effort and never fails into the caller.

mod backend;
mod backoff;
mod channel;
mod local;
mod redis;

pub use backend::NotificationBackend;
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use channel::{ChannelRegistry, EventQueue, RegistryStats};
pub use local::LocalBackend;
pub use redis::{user_channel, RedisBackend};

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::Settings;
use crate::event::{Event, EventKind};

/// One live stream session's view of the broker.
///
/// Holds the session's event queue. The session must hand the ids back to
/// [`Broker::unsubscribe`] on every termination path (the SSE layer does
/// this through a drop guard).
pub struct Subscription {
    pub user_id: i64,
    pub session_id: Uuid,
    pub queue: Arc<EventQueue>,
}

/// Registry façade over the configured delivery backend.
pub struct Broker {
    registry: Arc<ChannelRegistry>,
    backend: Arc<dyn NotificationBackend>,
}

impl Broker {
    /// Build a broker with the in-process backend. Used directly in tests;
    /// production code goes through [`Broker::connect`].
    pub fn local(channel_capacity: usize) -> Self {
        let registry = Arc::new(ChannelRegistry::new(channel_capacity));
        let backend = Arc::new(LocalBackend::new(registry.clone()));
        Self { registry, backend }
    }

    /// Select the delivery backend once for the process lifetime.
    ///
    /// When a Redis URL is configured, probe it with a bounded timeout; on
    /// success all operations fan out through Redis. Any probe failure is
    /// non-fatal and degrades to in-process delivery.
    pub async fn connect(settings: &Settings) -> Self {
        let capacity = settings.stream.channel_capacity;
        let registry = Arc::new(ChannelRegistry::new(capacity));

        if let Some(url) = &settings.redis.url {
            let probe_timeout = Duration::from_millis(settings.redis.probe_timeout_ms);
            match RedisBackend::connect(url, registry.clone(), probe_timeout).await {
                Ok(backend) => {
                    tracing::info!(backend = "redis", "Using distributed fan-out via Redis");
                    return Self {
                        registry,
                        backend: Arc::new(backend),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Redis unreachable, falling back to in-process delivery"
                    );
                }
            }
        } else {
            tracing::info!("No Redis URL configured, using in-process delivery");
        }

        let backend = Arc::new(LocalBackend::new(registry.clone()));
        Self { registry, backend }
    }

    /// Name of the active backend (`"local"` or `"redis"`).
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Attach a new session for `user_id` and return its queue.
    ///
    /// The first session for a user starts the distributed relay when the
    /// Redis backend is active.
    pub async fn subscribe(&self, user_id: i64) -> Subscription {
        let (session_id, queue, first) = self.registry.attach(user_id);
        if first {
            self.backend.on_subscribe(user_id).await;
        }

        tracing::info!(
            user_id = user_id,
            session_id = %session_id,
            "Subscribed to notification stream"
        );

        Subscription {
            user_id,
            session_id,
            queue,
        }
    }

    /// Detach one session. The last session for a user also stops the
    /// distributed relay. Safe to call for an already-removed session.
    pub async fn unsubscribe(&self, user_id: i64, session_id: Uuid) {
        let last = self.registry.detach(user_id, session_id);
        if last {
            self.backend.on_unsubscribe(user_id).await;
        }

        tracing::info!(
            user_id = user_id,
            session_id = %session_id,
            "Unsubscribed from notification stream"
        );
    }

    /// Publish an event for `user_id`. Best-effort: delivery failures and
    /// queue overflow are logged inside the backend, never returned.
    pub async fn publish(&self, user_id: i64, kind: EventKind, data: serde_json::Value) {
        let event = Event::new(kind, data);
        self.backend.publish(user_id, event).await;
    }

    /// Number of live sessions for a user.
    pub fn session_count(&self, user_id: i64) -> usize {
        self.registry.session_count(user_id)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

use async_trait::async_trait;

use crate::event::Event;

/// Delivery strategy behind the broker.
///
/// Two implementations exist: `LocalBackend` (single process, direct
/// enqueue) and `RedisBackend` (fan-out across processes via Redis
/// pub/sub). The broker picks one at construction time and never changes
/// it for the process lifetime.
///
/// All operations are best-effort: failures are logged inside the backend
/// and never surfaced to the producer.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Backend name for logs and the stats endpoint.
    fn name(&self) -> &'static str;

    /// Publish an event for `user_id`.
    async fn publish(&self, user_id: i64, event: Event);

    /// Called when the first session for `user_id` attaches.
    async fn on_subscribe(&self, user_id: i64);

    /// Called after the last session for `user_id` detaches.
    async fn on_unsubscribe(&self, user_id: i64);
}

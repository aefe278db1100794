use std::sync::Arc;

use async_trait::async_trait;

use crate::event::Event;

use super::backend::NotificationBackend;
use super::channel::ChannelRegistry;

/// Single-process delivery: publish enqueues straight into the target
/// user's session queues. Also the fallback when Redis is not configured
/// or unreachable at startup.
pub struct LocalBackend {
    registry: Arc<ChannelRegistry>,
}

impl LocalBackend {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn publish(&self, user_id: i64, event: Event) {
        let delivered = self.registry.deliver(user_id, &event);
        tracing::debug!(
            user_id = user_id,
            event_kind = %event.kind,
            delivered = delivered,
            "Published event locally"
        );
    }

    async fn on_subscribe(&self, _user_id: i64) {}

    async fn on_unsubscribe(&self, _user_id: i64) {}
}

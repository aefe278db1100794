//! Distributed backend: fan-out across server processes via Redis pub/sub.
//!
//! `publish` never enqueues locally; delivery to sessions in this process
//! happens only through the per-user relay task, so publish semantics are
//! identical regardless of which process a subscriber is attached to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::event::Event;

use super::backend::NotificationBackend;
use super::backoff::ExponentialBackoff;
use super::channel::ChannelRegistry;

/// Pub/sub channel for one user. Must be deterministic across every
/// process sharing the same Redis instance.
pub fn user_channel(user_id: i64) -> String {
    format!("notifications:user:{}", user_id)
}

/// Handle to one running relay task.
struct RelayHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Redis-backed delivery strategy.
///
/// One relay task per user with at least one live session; each relay uses
/// a dedicated pub/sub connection and is stopped and joined when the last
/// session detaches.
pub struct RedisBackend {
    client: Client,
    publisher: ConnectionManager,
    registry: Arc<ChannelRegistry>,
    relays: DashMap<i64, RelayHandle>,
}

impl RedisBackend {
    /// Connect and probe the Redis instance.
    ///
    /// Fails fast (bounded by `probe_timeout`) so startup can fall back to
    /// the local backend when Redis is absent or unreachable.
    pub async fn connect(
        url: &str,
        registry: Arc<ChannelRegistry>,
        probe_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::open(url)?;

        let mut publisher =
            tokio::time::timeout(probe_timeout, ConnectionManager::new(client.clone()))
                .await
                .map_err(|_| anyhow::anyhow!("Redis connection timed out"))??;

        let pong: String = tokio::time::timeout(
            probe_timeout,
            redis::cmd("PING").query_async(&mut publisher),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timed out"))??;
        anyhow::ensure!(pong == "PONG", "Unexpected PING reply: {pong}");

        Ok(Self {
            client,
            publisher,
            registry,
            relays: DashMap::new(),
        })
    }

    /// Remove the user's relay handle, but only while the user has no live
    /// session. The check and the removal are atomic (both happen under the
    /// relay map's shard lock), so a concurrent subscribe either sees the
    /// relay still registered or finds it already gone and spawns a fresh
    /// one; a live session is never left without a relay.
    fn take_idle_relay(
        relays: &DashMap<i64, RelayHandle>,
        registry: &ChannelRegistry,
        user_id: i64,
    ) -> Option<RelayHandle> {
        relays
            .remove_if(&user_id, |_, _| registry.session_count(user_id) == 0)
            .map(|(_, handle)| handle)
    }

    /// Relay loop for one user: subscribe, deliver, reconnect with backoff.
    async fn relay_loop(
        client: Client,
        registry: Arc<ChannelRegistry>,
        user_id: i64,
        shutdown: broadcast::Sender<()>,
    ) {
        let channel = user_channel(user_id);
        let mut backoff = ExponentialBackoff::new();

        loop {
            match Self::run_relay(&client, &registry, user_id, &channel, &shutdown, &mut backoff)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        user_id = user_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Relay connection error, reconnecting"
                    );
                    let mut shutdown_rx = shutdown.subscribe();
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::debug!(user_id = user_id, "Relay stopped");
    }

    /// One relay connection lifetime. Returns `Ok(())` only on shutdown.
    async fn run_relay(
        client: &Client,
        registry: &ChannelRegistry,
        user_id: i64,
        channel: &str,
        shutdown: &broadcast::Sender<()>,
        backoff: &mut ExponentialBackoff,
    ) -> anyhow::Result<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        backoff.reset();

        tracing::debug!(user_id = user_id, channel = %channel, "Relay subscription established");

        let mut messages = pubsub.on_message();
        let mut shutdown_rx = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        anyhow::bail!("pub/sub message stream ended");
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(user_id = user_id, error = %e, "Failed to read relay payload");
                            continue;
                        }
                    };
                    match serde_json::from_str::<Event>(&payload) {
                        Ok(event) => {
                            registry.deliver(user_id, &event);
                        }
                        Err(e) => {
                            tracing::warn!(
                                user_id = user_id,
                                error = %e,
                                "Failed to decode relay message, dropping"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NotificationBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, user_id: i64, event: Event) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(user_id = user_id, error = %e, "Failed to encode event, dropping");
                return;
            }
        };

        let channel = user_channel(user_id);
        let mut conn = self.publisher.clone();
        let result: redis::RedisResult<i64> = conn.publish(&channel, payload).await;
        match result {
            Ok(receivers) => {
                tracing::debug!(
                    user_id = user_id,
                    channel = %channel,
                    receivers = receivers,
                    "Published event to Redis"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = user_id,
                    channel = %channel,
                    error = %e,
                    "Redis publish failed, event dropped"
                );
            }
        }
    }

    async fn on_subscribe(&self, user_id: i64) {
        if self.relays.contains_key(&user_id) {
            return;
        }

        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(Self::relay_loop(
            self.client.clone(),
            self.registry.clone(),
            user_id,
            shutdown.clone(),
        ));
        self.relays.insert(user_id, RelayHandle { shutdown, task });

        tracing::debug!(user_id = user_id, "Relay started");
    }

    async fn on_unsubscribe(&self, user_id: i64) {
        // The registry detach that triggered this call and the call itself
        // are separated by an await: a reconnecting client may attach a new
        // session in between, and its on_subscribe sees the old relay still
        // registered and does not spawn another. Removing unconditionally
        // here would leave that session with no relay at all, so the handle
        // is only taken while the user is truly idle.
        let Some(handle) = Self::take_idle_relay(&self.relays, &self.registry, user_id) else {
            return;
        };

        // Stop the relay and wait for it so the pub/sub connection never
        // outlives the subscription that created it.
        let _ = handle.shutdown.send(());
        if let Err(e) = handle.task.await {
            tracing::warn!(user_id = user_id, error = %e, "Relay task join failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn test_user_channel_name() {
        assert_eq!(user_channel(5), "notifications:user:5");
        assert_eq!(user_channel(1042), "notifications:user:1042");
    }

    fn idle_relay_handle() -> RelayHandle {
        let (shutdown, _) = broadcast::channel(1);
        RelayHandle {
            shutdown,
            task: tokio::spawn(async {}),
        }
    }

    #[tokio::test]
    async fn test_relay_kept_when_session_reattaches_before_stop() {
        let registry = ChannelRegistry::new(10);
        let relays = DashMap::new();
        relays.insert(7, idle_relay_handle());

        // A reconnecting client attached again between the last detach and
        // the relay stop; its subscribe saw the relay still registered.
        registry.attach(7);

        assert!(RedisBackend::take_idle_relay(&relays, &registry, 7).is_none());
        assert!(relays.contains_key(&7));
    }

    #[tokio::test]
    async fn test_relay_taken_once_user_is_idle() {
        let registry = ChannelRegistry::new(10);
        let relays = DashMap::new();
        relays.insert(7, idle_relay_handle());

        let (session_id, _, _) = registry.attach(7);
        registry.detach(7, session_id);

        let handle = RedisBackend::take_idle_relay(&relays, &registry, 7);
        assert!(handle.is_some());
        assert!(!relays.contains_key(&7));
    }

    #[tokio::test]
    async fn test_take_idle_relay_without_handle_is_noop() {
        let registry = ChannelRegistry::new(10);
        let relays = DashMap::new();
        assert!(RedisBackend::take_idle_relay(&relays, &registry, 7).is_none());
    }

    #[test]
    fn test_relay_decodes_published_wire_format() {
        // What publish() writes must be what the relay reads back.
        let event = Event::new(
            EventKind::Notification,
            serde_json::json!({"title": "Lead Assigned: Jane Doe"}),
        );
        let wire = serde_json::to_string(&event).unwrap();

        let decoded: Event = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded.kind, EventKind::Notification);
        assert_eq!(decoded.data["title"], "Lead Assigned: Jane Doe");
        assert_eq!(decoded.timestamp, event.timestamp);
    }
}

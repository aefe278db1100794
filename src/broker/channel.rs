//! Per-user event channels and the session registry.
//!
//! Each open stream session owns one bounded `EventQueue`. The
//! `ChannelRegistry` maps `user_id` to the set of live sessions for that
//! user and fans published events out to all of them. Overflow policy is
//! drop-oldest: a producer is never blocked by a slow consumer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use smallvec::SmallVec;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::event::Event;

/// Bounded FIFO buffer of pending events for one stream session.
///
/// Thread-safe for concurrent push/pop without any registry lock held.
/// Single async consumer (the owning session); any number of producers.
pub struct EventQueue {
    buffer: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(16))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue an event, dropping the oldest buffered event when full.
    ///
    /// Returns `true` if an event was dropped to make room. Never blocks.
    pub fn push(&self, event: Event) -> bool {
        let dropped = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            let dropped = if buffer.len() >= self.capacity {
                buffer.pop_front().is_some()
            } else {
                false
            };
            buffer.push_back(event);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Pop the oldest buffered event, if any.
    pub fn try_pop(&self) -> Option<Event> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Wait for the next event.
    pub async fn recv(&self) -> Event {
        loop {
            // Arm the wakeup before checking the buffer so a push between
            // the check and the await is not lost.
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return event;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for the next event.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One live session attached to a user.
struct SessionSlot {
    id: Uuid,
    queue: Arc<EventQueue>,
}

/// Registry of active stream sessions, keyed by user id.
///
/// Multiple simultaneous sessions per user are supported (two browser tabs
/// each get their own queue); delivery fans out to every session and
/// detaching one session leaves the others untouched.
pub struct ChannelRegistry {
    users: DashMap<i64, SmallVec<[SessionSlot; 2]>>,
    capacity: usize,
}

/// Snapshot of registry occupancy, served by the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub unique_users: usize,
}

impl ChannelRegistry {
    /// Create a registry whose queues hold at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            users: DashMap::new(),
            capacity,
        }
    }

    /// Attach a new session for `user_id`.
    ///
    /// Returns the session id, its queue, and whether this is the user's
    /// first live session (the distributed adapter starts its relay then).
    pub fn attach(&self, user_id: i64) -> (Uuid, Arc<EventQueue>, bool) {
        let session_id = Uuid::new_v4();
        let queue = Arc::new(EventQueue::new(self.capacity));

        let mut sessions = self.users.entry(user_id).or_default();
        let first = sessions.is_empty();
        sessions.push(SessionSlot {
            id: session_id,
            queue: queue.clone(),
        });

        tracing::debug!(
            user_id = user_id,
            session_id = %session_id,
            sessions = sessions.len(),
            "Session attached"
        );

        (session_id, queue, first)
    }

    /// Detach one session. Returns `true` if it was the user's last session.
    pub fn detach(&self, user_id: i64, session_id: Uuid) -> bool {
        let mut last = false;
        if let Some(mut sessions) = self.users.get_mut(&user_id) {
            sessions.retain(|slot| slot.id != session_id);
            last = sessions.is_empty();
        }
        if last {
            self.users.remove_if(&user_id, |_, sessions| sessions.is_empty());
        }

        tracing::debug!(
            user_id = user_id,
            session_id = %session_id,
            last = last,
            "Session detached"
        );

        last
    }

    /// Deliver an event to every live session of `user_id`.
    ///
    /// Returns the number of sessions reached. A user with no sessions is
    /// not an error; the event is simply dropped.
    pub fn deliver(&self, user_id: i64, event: &Event) -> usize {
        let Some(sessions) = self.users.get(&user_id) else {
            tracing::debug!(
                user_id = user_id,
                event_kind = %event.kind,
                "No active subscription, event dropped"
            );
            return 0;
        };

        let mut delivered = 0;
        for slot in sessions.iter() {
            if slot.queue.push(event.clone()) {
                tracing::debug!(
                    user_id = user_id,
                    session_id = %slot.id,
                    "Queue full, dropped oldest event"
                );
            }
            delivered += 1;
        }
        delivered
    }

    /// Number of live sessions for a user.
    pub fn session_count(&self, user_id: i64) -> usize {
        self.users.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut active_sessions = 0;
        let mut unique_users = 0;
        for entry in self.users.iter() {
            unique_users += 1;
            active_sessions += entry.len();
        }
        RegistryStats {
            active_sessions,
            unique_users,
        }
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

use crate::Event;

/// Bounded inbox size for a single subscriber. A slow subscriber whose inbox
/// fills up misses subsequent events rather than stalling the broadcaster.
const SUBSCRIBER_INBOX_CAPACITY: usize = 256;

/// Opaque handle returned by `subscribe`/`subscribe_wildcard`, used only to
/// `unsubscribe` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// A delivered bus message: the session it was broadcast on, and the event.
pub type Delivery = (String, Event);

struct Subscriber {
    handle: SubscriptionHandle,
    tx: mpsc::Sender<Delivery>,
}

/// Central event registry. Maps `session_id` to its live subscribers, plus a
/// wildcard set that receives every broadcast regardless of session.
///
/// A registry crash loses every subscription and is treated as catastrophic —
/// it is expected to run at the top of the supervision tree. Individual
/// subscriber failures (a dropped receiver, a full inbox) are absorbed here
/// and never propagate to the broadcaster.
pub struct EventBus {
    next_handle: AtomicU64,
    by_session: Mutex<HashMap<String, Vec<Subscriber>>>,
    wildcard: Mutex<Vec<Subscriber>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { next_handle: AtomicU64::new(1), by_session: Mutex::new(HashMap::new()), wildcard: Mutex::new(Vec::new()) }
    }

    fn alloc_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe to events broadcast on a single session.
    pub fn subscribe(&self, session_id: impl Into<String>) -> (SubscriptionHandle, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_INBOX_CAPACITY);
        let handle = self.alloc_handle();
        self.by_session
            .lock()
            .unwrap()
            .entry(session_id.into())
            .or_default()
            .push(Subscriber { handle, tx });
        (handle, rx)
    }

    /// Subscribe to events broadcast on any session.
    pub fn subscribe_wildcard(&self) -> (SubscriptionHandle, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_INBOX_CAPACITY);
        let handle = self.alloc_handle();
        self.wildcard.lock().unwrap().push(Subscriber { handle, tx });
        (handle, rx)
    }

    /// Remove a subscription. Safe to call twice; the second call is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.by_session.lock().unwrap().retain(|_, subs| {
            subs.retain(|s| s.handle != handle);
            true
        });
        self.wildcard.lock().unwrap().retain(|s| s.handle != handle);
    }

    /// Broadcast an event for `session_id` to every matching subscriber.
    ///
    /// Never blocks indefinitely: uses `try_send`, so a subscriber whose
    /// inbox is full misses the event rather than stalling the broadcaster.
    /// Subscribers whose receiver has been dropped are pruned immediately.
    pub fn broadcast(&self, session_id: impl AsRef<str>, event: Event) {
        let session_id = session_id.as_ref();

        if let Some(subs) = self.by_session.lock().unwrap().get_mut(session_id) {
            subs.retain(|s| match s.tx.try_send((session_id.to_string(), event.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session_id, "subscriber inbox full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }

        self.wildcard.lock().unwrap().retain(|s| match s.tx.try_send((session_id.to_string(), event.clone())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("wildcard subscriber inbox full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;

    #[tokio::test]
    async fn subscriber_receives_events_for_its_session() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe("s1");
        bus.broadcast("s1", Event::AgentStart);
        let (sid, ev) = rx.recv().await.unwrap();
        assert_eq!(sid, "s1");
        assert!(matches!(ev, Event::AgentStart));
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_sessions_events() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe("s1");
        bus.broadcast("s2", Event::AgentStart);
        let got = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(got.is_err(), "should not have received an event for a different session");
    }

    #[tokio::test]
    async fn wildcard_subscriber_receives_all_sessions() {
        let bus = EventBus::new();
        let (_h, mut rx) = bus.subscribe_wildcard();
        bus.broadcast("s1", Event::AgentStart);
        bus.broadcast("s2", Event::AgentAbort);
        let (sid1, _) = rx.recv().await.unwrap();
        let (sid2, _) = rx.recv().await.unwrap();
        assert_eq!(sid1, "s1");
        assert_eq!(sid2, "s2");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (handle, mut rx) = bus.subscribe("s1");
        bus.unsubscribe(handle);
        bus.broadcast("s1", Event::AgentStart);
        let got = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_broadcast() {
        let bus = EventBus::new();
        let (_h, rx) = bus.subscribe("s1");
        drop(rx);
        // Must not panic or block even though the receiver is gone.
        bus.broadcast("s1", Event::AgentStart);
        assert!(bus.by_session.lock().unwrap().get("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn multiple_subscribers_per_session_all_receive() {
        let bus = EventBus::new();
        let (_h1, mut rx1) = bus.subscribe("s1");
        let (_h2, mut rx2) = bus.subscribe("s1");
        bus.broadcast("s1", Event::AgentStart);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}

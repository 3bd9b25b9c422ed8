// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Event Bus & Fan-out (spec.md §4.3, C3).
//!
//! Each control context owns one `EventBus`: a bounded in-memory ring of the
//! most recent events plus a live broadcast to subscribers. `publish` never
//! blocks on a slow subscriber — lagging subscribers silently drop their
//! oldest undelivered events instead (spec.md §4.3), surfaced here via
//! `tokio::sync::broadcast`'s built-in lag detection.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use ctrlplane_core::{Event, EventId};
use ctrlplane_core::event::EventDraft;
use parking_lot::Mutex;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub ring_size: usize,
    pub subscriber_queue_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            ring_size: 500,
            subscriber_queue_size: 256,
        }
    }
}

struct Ring {
    events: VecDeque<Event>,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: Event) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn recent(&self, n: usize) -> Vec<Event> {
        self.events.iter().rev().take(n).rev().cloned().collect()
    }
}

/// Append-only event ring plus live fan-out for one control context.
pub struct EventBus {
    next_id: AtomicU64,
    ring: Mutex<Ring>,
    sender: broadcast::Sender<Event>,
    lag_count: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _rx) = broadcast::channel(config.subscriber_queue_size.max(1));
        Self {
            next_id: AtomicU64::new(1),
            ring: Mutex::new(Ring::new(config.ring_size.max(1))),
            sender,
            lag_count: AtomicU64::new(0),
        }
    }

    /// Publish a draft event, stamping `event_id` (strictly increasing,
    /// total order per context — spec.md §3/§5) and `timestamp`.
    pub fn publish(&self, draft: EventDraft) -> Event {
        let event_id = EventId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let event = Event {
            event_id,
            timestamp: Utc::now(),
            event_type: draft.event_type,
            message: draft.message,
            metadata: draft.metadata,
            agent_id: draft.agent_id,
            task_id: draft.task_id,
            tick_index: draft.tick_index,
        };
        self.ring.lock().push(event.clone());
        // Fan-out never blocks: `send` is non-blocking and returns the
        // number of live receivers; an error just means nobody is
        // subscribed right now, which is not a failure.
        let _ = self.sender.send(event.clone());
        event
    }

    /// Live-tail only: a new subscriber does not receive historical events
    /// (spec.md §4.3, and the Open Question in spec.md §9 frozen to
    /// live-tail-only).
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn recent(&self, n: usize) -> Vec<Event> {
        self.ring.lock().recent(n)
    }

    pub fn lag_count(&self) -> u64 {
        self.lag_count.load(Ordering::Relaxed)
    }

    fn note_lag(&self, skipped: u64) {
        self.lag_count.fetch_add(skipped, Ordering::Relaxed);
        tracing::warn!(skipped, "subscriber lagging, dropping oldest undelivered events");
    }
}

/// A live subscriber handle. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Await the next event, transparently skipping past any events dropped
    /// due to lag (the bus already counted them via `note_lag`).
    pub async fn recv(&mut self, bus: &EventBus) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    bus.note_lag(skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlplane_core::EventType;

    fn draft(msg: &str) -> EventDraft {
        EventDraft::new(EventType::TickAdvanced, msg)
    }

    #[test]
    fn event_ids_strictly_increase() {
        let bus = EventBus::new(EventBusConfig::default());
        let a = bus.publish(draft("a"));
        let b = bus.publish(draft("b"));
        assert!(b.event_id > a.event_id);
    }

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let bus = EventBus::new(EventBusConfig {
            ring_size: 3,
            subscriber_queue_size: 8,
        });
        for i in 0..5 {
            bus.publish(draft(&format!("e{i}")));
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "e2");
        assert_eq!(recent[2].message, "e4");
    }

    #[tokio::test]
    async fn subscriber_sees_total_order() {
        let bus = EventBus::new(EventBusConfig::default());
        let mut sub = bus.subscribe();
        bus.publish(draft("a"));
        bus.publish(draft("b"));
        let first = sub.recv(&bus).await.unwrap();
        let second = sub.recv(&bus).await.unwrap();
        assert!(first.event_id < second.event_id);
        assert_eq!(first.message, "a");
        assert_eq!(second.message, "b");
    }

    #[tokio::test]
    async fn new_subscriber_does_not_see_history() {
        let bus = EventBus::new(EventBusConfig::default());
        bus.publish(draft("before"));
        let mut sub = bus.subscribe();
        bus.publish(draft("after"));
        let received = sub.recv(&bus).await.unwrap();
        assert_eq!(received.message, "after");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::{Event, Priority};

/// Thread-safe bounded queue of pending realtime events.
///
/// Pop order is `(priority rank desc, insertion order)`; publishers may be
/// any thread. `notify` wakes all waiters without delivering an event, which
/// shutdown paths use to unblock the injector.
pub struct EventBus {
    maxlen: usize,
    queue: Mutex<VecDeque<Event>>,
    cond: Condvar,
}

impl EventBus {
    pub fn new(maxlen: usize) -> Self {
        Self {
            maxlen: maxlen.max(1),
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Append an event, optionally replacing a pending event with the same
    /// dedupe key. At capacity the oldest pending event is dropped.
    pub fn publish(&self, event: Event, coalesce: bool) {
        let mut queue = self.queue.lock();
        if coalesce {
            if let Some(key) = event.dedupe_key.as_deref() {
                if let Some(index) = queue.iter().position(|e| e.dedupe_key.as_deref() == Some(key))
                {
                    queue.remove(index);
                }
            }
        }
        if queue.len() >= self.maxlen {
            if let Some(dropped) = queue.pop_front() {
                warn!(source = %dropped.source, "event bus full; dropping oldest event");
            }
        }
        queue.push_back(event);
        self.cond.notify_one();
    }

    /// Publish a plain text message event from a subsystem.
    pub fn publish_text(&self, message: impl Into<String>, source: &str, priority: Priority) {
        self.publish(
            Event::new(source, "message")
                .with_priority(priority)
                .with_content(message),
            false,
        );
    }

    /// Block up to `timeout` for the highest-priority pending event.
    /// Returns `None` on timeout and after a bare `notify`.
    pub fn get_next(&self, timeout: Duration) -> Option<Event> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.cond.wait_for(&mut queue, timeout);
        }
        Self::pop_highest_priority(&mut queue)
    }

    /// Atomically remove and return all pending events in insertion order.
    pub fn drain(&self) -> Vec<Event> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    /// Wake all waiters without enqueueing anything (shutdown).
    pub fn notify(&self) {
        let _queue = self.queue.lock();
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn pop_highest_priority(queue: &mut VecDeque<Event>) -> Option<Event> {
        if queue.len() <= 1 {
            return queue.pop_front();
        }
        let mut best_index = 0;
        let mut best_rank = 0i16;
        let mut found = false;
        for (index, event) in queue.iter().enumerate() {
            let rank = event.priority.rank() as i16;
            if !found || rank > best_rank {
                found = true;
                best_rank = rank;
                best_index = index;
                if best_rank == Priority::Critical.rank() as i16 {
                    break;
                }
            }
        }
        queue.remove(best_index)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: &str, priority: Priority) -> Event {
        Event::new(source, "message").with_priority(priority)
    }

    #[test]
    fn pops_in_priority_then_fifo_order() {
        let bus = EventBus::new(10);
        bus.publish(event("a", Priority::Normal), false);
        bus.publish(event("b", Priority::Critical), false);
        bus.publish(event("c", Priority::Normal), false);
        bus.publish(event("d", Priority::High), false);

        let order: Vec<String> = (0..4)
            .filter_map(|_| bus.get_next(Duration::from_millis(1)))
            .map(|e| e.source)
            .collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn fifo_within_same_priority() {
        let bus = EventBus::new(10);
        for name in ["first", "second", "third"] {
            bus.publish(event(name, Priority::High), false);
        }
        assert_eq!(bus.get_next(Duration::from_millis(1)).unwrap().source, "first");
        assert_eq!(bus.get_next(Duration::from_millis(1)).unwrap().source, "second");
    }

    #[test]
    fn capacity_drops_oldest() {
        let bus = EventBus::new(3);
        for name in ["a", "b", "c", "d"] {
            bus.publish(event(name, Priority::Normal), false);
        }
        assert_eq!(bus.len(), 3);
        assert_eq!(bus.get_next(Duration::from_millis(1)).unwrap().source, "b");
    }

    #[test]
    fn coalesce_replaces_pending_event_with_same_key() {
        let bus = EventBus::new(10);
        for voltage in [7.4, 7.3, 7.2] {
            bus.publish(
                Event::new("battery", "status")
                    .with_dedupe_key("battery_status")
                    .with_metadata_entry("voltage", serde_json::json!(voltage)),
                true,
            );
        }
        assert_eq!(bus.len(), 1);
        let event = bus.get_next(Duration::from_millis(1)).unwrap();
        assert_eq!(event.metadata["voltage"], serde_json::json!(7.2));
    }

    #[test]
    fn coalesce_without_key_appends() {
        let bus = EventBus::new(10);
        bus.publish(event("a", Priority::Normal), true);
        bus.publish(event("b", Priority::Normal), true);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn get_next_times_out_on_empty_queue() {
        let bus = EventBus::new(10);
        assert!(bus.get_next(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn drain_clears_the_queue() {
        let bus = EventBus::new(10);
        bus.publish(event("a", Priority::Normal), false);
        bus.publish(event("b", Priority::High), false);
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(bus.is_empty());
    }

    #[test]
    fn notify_unblocks_waiter_without_event() {
        use std::sync::Arc;
        let bus = Arc::new(EventBus::new(10));
        let waiter = Arc::clone(&bus);
        let handle = std::thread::spawn(move || waiter.get_next(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        bus.notify();
        assert!(handle.join().unwrap().is_none());
    }
}

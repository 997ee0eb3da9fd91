// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use theo_events::{Event, EventBus, Priority};

/// Drains the event bus on a worker thread and forwards admissible events
/// to the session task over an mpsc channel.
///
/// Expired events drop; non-critical events with a dedupe key on cooldown
/// drop; critical events bypass the cooldown entirely.
pub struct EventInjector {
    bus: Arc<EventBus>,
    ready_rx: watch::Receiver<bool>,
    out_tx: mpsc::Sender<Event>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl EventInjector {
    pub fn new(
        bus: Arc<EventBus>,
        ready_rx: watch::Receiver<bool>,
        out_tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            bus,
            ready_rx,
            out_tx,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn start(&mut self) {
        if self.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        let bus = Arc::clone(&self.bus);
        let ready_rx = self.ready_rx.clone();
        let out_tx = self.out_tx.clone();
        let stop = Arc::clone(&self.stop);

        self.thread = Some(
            std::thread::Builder::new()
                .name("event-injector".into())
                .spawn(move || {
                    let mut cooldowns = CooldownLedger::default();
                    while !stop.load(Ordering::SeqCst) {
                        if !*ready_rx.borrow() {
                            std::thread::sleep(Duration::from_millis(500));
                            continue;
                        }
                        let Some(event) = bus.get_next(Duration::from_millis(500)) else {
                            continue;
                        };
                        let now = Instant::now();
                        if event.is_expired(now) {
                            debug!(source = %event.source, "dropping expired event");
                            continue;
                        }
                        if cooldowns.is_on_cooldown(&event, now) {
                            debug!(
                                source = %event.source,
                                key = event.dedupe_key.as_deref().unwrap_or(""),
                                "dropping cooldown event"
                            );
                            continue;
                        }
                        if out_tx.blocking_send(event).is_err() {
                            warn!("injector channel closed; stopping drain");
                            return;
                        }
                    }
                })
                .expect("spawn event injector thread"),
        );
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.bus.notify();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventInjector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-key last-sent ledger. Passing the check records the send time.
#[derive(Default)]
struct CooldownLedger {
    last_sent_by_key: HashMap<String, Instant>,
}

impl CooldownLedger {
    fn is_on_cooldown(&mut self, event: &Event, now: Instant) -> bool {
        if event.priority == Priority::Critical {
            return false;
        }
        let (Some(key), Some(cooldown)) = (event.dedupe_key.as_deref(), event.cooldown) else {
            return false;
        };
        if let Some(&last_sent) = self.last_sent_by_key.get(key) {
            if now.duration_since(last_sent) < cooldown {
                return true;
            }
        }
        self.last_sent_by_key.insert(key.to_string(), now);
        false
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

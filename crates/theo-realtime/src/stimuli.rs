// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use theo_config::StimuliConfig;

/// Debounced, coalesced emission handed to the session task.
#[derive(Debug, Clone)]
pub struct StimulusSummary {
    pub trigger: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
struct PendingStimulus {
    trigger: String,
    at: Instant,
    priority: i32,
    metadata: Value,
    count: u32,
}

#[derive(Default)]
struct CoordinatorState {
    queue: HashMap<String, PendingStimulus>,
    order: Vec<String>,
    task_pending: bool,
    last_emit: Option<Instant>,
}

/// Coalesces injected triggers over a debounce window.
///
/// Repeats of a trigger inside the window merge (latest metadata wins,
/// count increments, priority maxes); low-priority triggers inside the
/// post-emit cooldown are dropped silently. Emission goes over an mpsc
/// channel to the session task.
pub struct StimuliCoordinator {
    config: StimuliConfig,
    state: Arc<Mutex<CoordinatorState>>,
    emit_tx: mpsc::UnboundedSender<StimulusSummary>,
}

impl StimuliCoordinator {
    pub fn new(config: StimuliConfig, emit_tx: mpsc::UnboundedSender<StimulusSummary>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            emit_tx,
        }
    }

    pub async fn enqueue(&self, trigger: &str, metadata: Value, priority: i32) {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if self.config.cooldown_s > 0.0 && priority <= 0 {
            if let Some(last_emit) = state.last_emit {
                let elapsed = now.duration_since(last_emit);
                let cooldown = Duration::from_secs_f64(self.config.cooldown_s);
                if elapsed < cooldown {
                    info!(
                        trigger,
                        remaining_s = (cooldown - elapsed).as_secs_f64(),
                        "dropping low-priority stimulus in cooldown"
                    );
                    return;
                }
            }
        }

        match state.queue.get_mut(trigger) {
            Some(pending) => {
                pending.at = now;
                pending.metadata = metadata;
                pending.count += 1;
                pending.priority = pending.priority.max(priority);
            }
            None => {
                state.queue.insert(
                    trigger.to_string(),
                    PendingStimulus {
                        trigger: trigger.to_string(),
                        at: now,
                        priority,
                        metadata,
                        count: 1,
                    },
                );
                state.order.push(trigger.to_string());
            }
        }

        if !state.task_pending {
            state.task_pending = true;
            let coordinator_state = Arc::clone(&self.state);
            let emit_tx = self.emit_tx.clone();
            let window = Duration::from_secs_f64(self.config.debounce_window_s.max(0.0));
            let window_s = self.config.debounce_window_s;
            tokio::spawn(async move {
                loop {
                    if !window.is_zero() {
                        tokio::time::sleep(window).await;
                    }
                    let events: Vec<PendingStimulus> = {
                        let mut state = coordinator_state.lock().await;
                        let events = state
                            .order
                            .iter()
                            .filter_map(|key| state.queue.get(key).cloned())
                            .collect();
                        state.queue.clear();
                        state.order.clear();
                        events
                    };
                    if events.is_empty() {
                        let mut state = coordinator_state.lock().await;
                        state.task_pending = false;
                        return;
                    }

                    let chosen = events
                        .iter()
                        .max_by_key(|event| (event.priority, event.at))
                        .cloned()
                        .expect("events is non-empty");
                    let payload = json!({
                        "event_count": events.iter().map(|e| e.count).sum::<u32>(),
                        "triggers": events.iter().map(|e| e.trigger.clone()).collect::<Vec<_>>(),
                        "counts": events
                            .iter()
                            .map(|e| (e.trigger.clone(), e.count))
                            .collect::<HashMap<_, _>>(),
                        "latest_metadata": events
                            .iter()
                            .map(|e| (e.trigger.clone(), e.metadata.clone()))
                            .collect::<HashMap<_, _>>(),
                        "debounce_window_s": window_s,
                    });
                    let _ = emit_tx.send(StimulusSummary {
                        trigger: chosen.trigger,
                        payload,
                    });

                    let mut state = coordinator_state.lock().await;
                    state.last_emit = Some(Instant::now());
                    // Triggers that accumulated during the window get
                    // another pass; otherwise the task retires.
                    if state.queue.is_empty() {
                        state.task_pending = false;
                        return;
                    }
                }
            });
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(
        debounce_window_s: f64,
        cooldown_s: f64,
    ) -> (StimuliCoordinator, mpsc::UnboundedReceiver<StimulusSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StimuliCoordinator::new(
                StimuliConfig {
                    debounce_window_s,
                    cooldown_s,
                },
                tx,
            ),
            rx,
        )
    }

    #[tokio::test]
    async fn repeats_coalesce_into_one_emission() {
        let (coordinator, mut rx) = coordinator(0.01, 0.0);
        for i in 0..3 {
            coordinator
                .enqueue("image_message", json!({"seq": i}), 0)
                .await;
        }
        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.trigger, "image_message");
        assert_eq!(summary.payload["event_count"], json!(3));
        assert_eq!(summary.payload["counts"]["image_message"], json!(3));
        // Latest metadata wins.
        assert_eq!(summary.payload["latest_metadata"]["image_message"]["seq"], json!(2));
    }

    #[tokio::test]
    async fn highest_priority_trigger_is_chosen() {
        let (coordinator, mut rx) = coordinator(0.01, 0.0);
        coordinator.enqueue("image_message", json!({}), 0).await;
        coordinator.enqueue("battery_alert", json!({}), 5).await;
        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.trigger, "battery_alert");
        let triggers = summary.payload["triggers"].as_array().unwrap();
        assert_eq!(triggers.len(), 2);
    }

    #[tokio::test]
    async fn low_priority_is_dropped_during_cooldown() {
        let (coordinator, mut rx) = coordinator(0.01, 60.0);
        coordinator.enqueue("first", json!({}), 0).await;
        assert!(rx.recv().await.is_some());
        // Inside the cooldown: dropped without emission.
        coordinator.enqueue("second", json!({}), 0).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn high_priority_bypasses_cooldown() {
        let (coordinator, mut rx) = coordinator(0.01, 60.0);
        coordinator.enqueue("first", json!({}), 0).await;
        assert!(rx.recv().await.is_some());
        coordinator.enqueue("urgent", json!({}), 3).await;
        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.trigger, "urgent");
    }

    #[tokio::test]
    async fn triggers_arriving_during_emit_get_another_pass() {
        let (coordinator, mut rx) = coordinator(0.05, 0.0);
        coordinator.enqueue("a", json!({}), 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.enqueue("b", json!({}), 0).await;
        // Both make it out, across at most two passes.
        let first = rx.recv().await.unwrap();
        let mut seen: Vec<String> = first.payload["triggers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        if !seen.contains(&"b".to_string()) {
            let second = rx.recv().await.unwrap();
            seen.push(second.trigger);
        }
        assert!(seen.contains(&"a".to_string()));
        assert!(seen.contains(&"b".to_string()));
    }
}

//! Interaction and delivery analytics.
//!
//! Events are buffered and flushed to the durable store either when the
//! buffer reaches the batch size or on the periodic flush tick, whichever
//! comes first. A failed flush re-queues the batch for the next attempt.
//! Dismissed/clicked events additionally update the per-(user, category,
//! kind) dismissal pattern by exponential moving average; patterns are only
//! ever updated, never deleted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use vigil_core::{AlertCategory, KeyValueStore};

use crate::config::AnalyticsConfig;

/// What the user (or the delivery pipeline) did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    Shown,
    Clicked,
    Dismissed,
    Snoozed,
    Acknowledged,
    Resolved,
    Delivered,
    DeliveryFailed,
}

impl InteractionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shown => "shown",
            Self::Clicked => "clicked",
            Self::Dismissed => "dismissed",
            Self::Snoozed => "snoozed",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Delivered => "delivered",
            Self::DeliveryFailed => "delivery_failed",
        }
    }

    /// Whether this action counts as the user engaging with the alert
    /// (used by the escalation interaction check). Snoozing defers the
    /// alert rather than handling it, so a reactivated alert must still
    /// be allowed to escalate.
    pub fn is_user_interaction(self) -> bool {
        matches!(
            self,
            Self::Clicked | Self::Dismissed | Self::Acknowledged | Self::Resolved
        )
    }
}

/// One interaction or delivery event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: String,
    /// Alert or notification id the event refers to.
    pub notification_id: String,
    pub category: AlertCategory,
    /// Type within the category; part of the dismissal-pattern key.
    pub kind: String,
    pub action: InteractionAction,
    pub time_to_action_ms: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(
        user_id: impl Into<String>,
        notification_id: impl Into<String>,
        category: AlertCategory,
        kind: impl Into<String>,
        action: InteractionAction,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_id: notification_id.into(),
            category,
            kind: kind.into(),
            action,
            time_to_action_ms: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn time_to_action(mut self, ms: u64) -> Self {
        self.time_to_action_ms = Some(ms);
        self
    }
}

/// Learned dismissal behavior for one (user, category, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DismissalPattern {
    /// EMA of "this got dismissed" in [0, 1].
    pub dismissal_rate: f64,
    /// EMA of time to action, milliseconds.
    pub average_time_to_action_ms: f64,
    pub preferred_actions: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
}

impl Default for DismissalPattern {
    fn default() -> Self {
        Self {
            dismissal_rate: 0.0,
            average_time_to_action_ms: 0.0,
            preferred_actions: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }
}

type PatternKey = (String, AlertCategory, String);

/// Buffered event recorder and dismissal-pattern table.
pub struct AnalyticsRecorder {
    config: AnalyticsConfig,
    buffer: Mutex<Vec<InteractionEvent>>,
    patterns: RwLock<HashMap<PatternKey, DismissalPattern>>,
    /// Users who interacted with each alert id.
    interacted: RwLock<HashMap<String, HashSet<String>>>,
    store: Option<Arc<dyn KeyValueStore>>,
    flush_seq: AtomicU64,
}

impl AnalyticsRecorder {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            buffer: Mutex::new(Vec::new()),
            patterns: RwLock::new(HashMap::new()),
            interacted: RwLock::new(HashMap::new()),
            store: None,
            flush_seq: AtomicU64::new(0),
        }
    }

    pub fn with_store(config: AnalyticsConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(config)
        }
    }

    fn pattern_storage_key(key: &PatternKey) -> String {
        format!("pattern:{}:{}:{}", key.0, key.1.as_str(), key.2)
    }

    /// Record one event. Updates the dismissal pattern for dismissed and
    /// clicked events, marks user interaction, and flushes if the buffer
    /// reached the batch size.
    pub async fn record(&self, event: InteractionEvent) {
        if event.action.is_user_interaction() {
            self.interacted
                .write()
                .await
                .entry(event.notification_id.clone())
                .or_default()
                .insert(event.user_id.clone());
        }

        if matches!(
            event.action,
            InteractionAction::Dismissed | InteractionAction::Clicked
        ) {
            self.update_pattern(&event).await;
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    async fn update_pattern(&self, event: &InteractionEvent) {
        let key: PatternKey = (
            event.user_id.clone(),
            event.category,
            event.kind.clone(),
        );
        let alpha = self.config.learning_rate;
        let dismissed = if event.action == InteractionAction::Dismissed {
            1.0
        } else {
            0.0
        };

        let updated = {
            let mut patterns = self.patterns.write().await;
            let pattern = patterns.entry(key.clone()).or_default();

            pattern.dismissal_rate = (1.0 - alpha) * pattern.dismissal_rate + alpha * dismissed;
            if let Some(ms) = event.time_to_action_ms {
                if pattern.average_time_to_action_ms == 0.0 {
                    pattern.average_time_to_action_ms = ms as f64;
                } else {
                    pattern.average_time_to_action_ms =
                        (1.0 - alpha) * pattern.average_time_to_action_ms + alpha * ms as f64;
                }
            }
            pattern
                .preferred_actions
                .insert(event.action.as_str().to_string());
            pattern.last_updated = event.occurred_at;
            pattern.clone()
        };

        if let Some(store) = &self.store {
            match serde_json::to_value(&updated) {
                Ok(value) => {
                    if let Err(err) = store.put(&Self::pattern_storage_key(&key), value).await {
                        warn!("Failed to persist dismissal pattern: {err}");
                    }
                }
                Err(err) => warn!("Failed to encode dismissal pattern: {err}"),
            }
        }
    }

    /// Flush buffered events to the durable store. On failure the batch is
    /// put back at the front of the buffer for the next attempt.
    pub async fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let Some(store) = &self.store else {
            debug!("Dropping {} analytics events (no store configured)", batch.len());
            return;
        };

        let seq = self.flush_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("analytics:batch:{seq:010}");
        let value = match serde_json::to_value(&batch) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to encode analytics batch: {err}");
                return;
            }
        };

        if let Err(err) = store.put(&key, value).await {
            warn!("Analytics flush failed, re-queueing {} events: {err}", batch.len());
            let mut buffer = self.buffer.lock().await;
            let mut requeued = batch;
            requeued.extend(buffer.drain(..));
            *buffer = requeued;
        } else {
            debug!("Flushed {} analytics events", batch.len());
        }
    }

    /// The learned pattern for (user, category, kind), if any.
    pub async fn pattern(
        &self,
        user_id: &str,
        category: AlertCategory,
        kind: &str,
    ) -> Option<DismissalPattern> {
        let key = (user_id.to_string(), category, kind.to_string());
        if let Some(pattern) = self.patterns.read().await.get(&key).cloned() {
            return Some(pattern);
        }

        // Fall back to the durable store for patterns learned in past runs.
        if let Some(store) = &self.store {
            if let Ok(Some(value)) = store.get(&Self::pattern_storage_key(&key)).await {
                if let Ok(pattern) = serde_json::from_value::<DismissalPattern>(value) {
                    self.patterns
                        .write()
                        .await
                        .insert(key, pattern.clone());
                    return Some(pattern);
                }
            }
        }
        None
    }

    /// Whether the user has interacted with this alert in any form.
    pub async fn has_interacted(&self, user_id: &str, alert_id: &str) -> bool {
        self.interacted
            .read()
            .await
            .get(alert_id)
            .is_some_and(|users| users.contains(user_id))
    }

    /// Number of events currently buffered.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_channel::MemoryStore;

    fn event(action: InteractionAction) -> InteractionEvent {
        InteractionEvent::new("alice", "a1", AlertCategory::System, "disk_usage", action)
    }

    #[tokio::test]
    async fn test_ema_update_on_dismiss_and_click() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig::default());

        recorder.record(event(InteractionAction::Dismissed)).await;
        let p = recorder
            .pattern("alice", AlertCategory::System, "disk_usage")
            .await
            .unwrap();
        assert!((p.dismissal_rate - 0.1).abs() < 1e-9);

        recorder.record(event(InteractionAction::Clicked)).await;
        let p = recorder
            .pattern("alice", AlertCategory::System, "disk_usage")
            .await
            .unwrap();
        assert!((p.dismissal_rate - 0.09).abs() < 1e-9);
        assert!(p.preferred_actions.contains("dismissed"));
        assert!(p.preferred_actions.contains("clicked"));
    }

    #[tokio::test]
    async fn test_time_to_action_ema() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig::default());

        recorder
            .record(event(InteractionAction::Clicked).time_to_action(10_000))
            .await;
        let p = recorder
            .pattern("alice", AlertCategory::System, "disk_usage")
            .await
            .unwrap();
        // First sample seeds the average directly.
        assert!((p.average_time_to_action_ms - 10_000.0).abs() < 1e-9);

        recorder
            .record(event(InteractionAction::Clicked).time_to_action(20_000))
            .await;
        let p = recorder
            .pattern("alice", AlertCategory::System, "disk_usage")
            .await
            .unwrap();
        assert!((p.average_time_to_action_ms - 11_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_shown_does_not_touch_pattern() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig::default());
        recorder.record(event(InteractionAction::Shown)).await;
        assert!(recorder
            .pattern("alice", AlertCategory::System, "disk_usage")
            .await
            .is_none());
        assert!(!recorder.has_interacted("alice", "a1").await);
    }

    #[tokio::test]
    async fn test_interaction_tracking() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig::default());
        recorder.record(event(InteractionAction::Clicked)).await;
        assert!(recorder.has_interacted("alice", "a1").await);
        assert!(!recorder.has_interacted("bob", "a1").await);
    }

    #[tokio::test]
    async fn test_snooze_does_not_count_as_interaction() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig::default());
        recorder.record(event(InteractionAction::Snoozed)).await;
        // A snoozed alert comes back; it must still be escalatable.
        assert!(!recorder.has_interacted("alice", "a1").await);
    }

    #[tokio::test]
    async fn test_size_triggered_flush() {
        let store = Arc::new(MemoryStore::new());
        let recorder = AnalyticsRecorder::with_store(
            AnalyticsConfig {
                batch_size: 2,
                ..Default::default()
            },
            store.clone(),
        );

        recorder.record(event(InteractionAction::Shown)).await;
        assert_eq!(recorder.buffered().await, 1);

        recorder.record(event(InteractionAction::Shown)).await;
        assert_eq!(recorder.buffered().await, 0);
        assert_eq!(store.keys_with_prefix("analytics:batch:").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues() {
        let store = Arc::new(MemoryStore::new());
        let recorder =
            AnalyticsRecorder::with_store(AnalyticsConfig::default(), store.clone());

        recorder.record(event(InteractionAction::Shown)).await;
        store.fail_next_puts(1);
        recorder.flush().await;
        // Batch kept for the next attempt.
        assert_eq!(recorder.buffered().await, 1);

        recorder.flush().await;
        assert_eq!(recorder.buffered().await, 0);
        assert_eq!(store.keys_with_prefix("analytics:batch:").await.len(), 1);
    }
}

//! Delivery dispatching.
//!
//! The dispatcher owns a FIFO queue of pending alert ids, drained in
//! fixed-size batches on a periodic tick. An in-progress flag keeps ticks
//! from overlapping. Fan-out resolves recipients, computes eligible
//! channels from preferences, and calls each channel adapter; failures are
//! retried through the scheduler up to the retry cap and then recorded as
//! terminal. Nothing here ever propagates a delivery failure to the caller
//! that created the alert.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_core::{
    Alert, ChannelAdapter, ChannelKind, DeliveryAttempt, RecipientResolver,
};

use crate::config::DispatchConfig;
use crate::preferences::{NotificationPreferences, PreferencesStore};

/// Running delivery counters, exposed through alert statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    pub retries_scheduled: u64,
    pub terminal_failures: u64,
}

/// A retry the engine should schedule after the retry delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub alert_id: String,
    pub user_id: String,
    pub channel: ChannelKind,
    /// Retry count for the next attempt.
    pub retry_count: u32,
    pub delay: Duration,
}

/// Result of fanning an alert out once.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub attempts: Vec<DeliveryAttempt>,
    pub retries: Vec<RetryRequest>,
}

/// Queue-draining channel fan-out.
pub struct DeliveryDispatcher {
    config: DispatchConfig,
    channels: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
    recipients: Arc<dyn RecipientResolver>,
    preferences: Arc<PreferencesStore>,
    queue: Mutex<VecDeque<String>>,
    in_progress: AtomicBool,
    stats: Mutex<DeliveryStats>,
}

impl DeliveryDispatcher {
    pub fn new(
        config: DispatchConfig,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        recipients: Arc<dyn RecipientResolver>,
        preferences: Arc<PreferencesStore>,
    ) -> Self {
        let channels = adapters.into_iter().map(|a| (a.kind(), a)).collect();
        Self {
            config,
            channels,
            recipients,
            preferences,
            queue: Mutex::new(VecDeque::new()),
            in_progress: AtomicBool::new(false),
            stats: Mutex::new(DeliveryStats::default()),
        }
    }

    /// Queue an alert for delivery on the next tick.
    pub fn enqueue(&self, alert_id: impl Into<String>) {
        self.queue
            .lock()
            .expect("dispatch lock poisoned")
            .push_back(alert_id.into());
    }

    /// Number of alerts waiting for the next tick.
    pub fn queued(&self) -> usize {
        self.queue.lock().expect("dispatch lock poisoned").len()
    }

    /// Claim the drain flag. Returns false if a drain is already running.
    pub fn begin_drain(&self) -> bool {
        !self.in_progress.swap(true, Ordering::SeqCst)
    }

    /// Release the drain flag.
    pub fn end_drain(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// Pop up to one batch of queued alert ids.
    pub fn take_batch(&self) -> Vec<String> {
        let mut queue = self.queue.lock().expect("dispatch lock poisoned");
        let n = self.config.batch_size.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Channels eligible for this alert under the given preferences:
    /// channel enabled, severity at or above the channel threshold, and the
    /// alert's category enabled and routed to the channel.
    pub fn eligible_channels(
        &self,
        prefs: &NotificationPreferences,
        alert: &Alert,
    ) -> Vec<ChannelKind> {
        let category = prefs.categories.get(&alert.category);
        if let Some(category) = category {
            if !category.enabled || alert.priority() < category.min_priority {
                return Vec::new();
            }
        }

        prefs
            .channels
            .iter()
            .filter(|(kind, channel)| {
                channel.enabled
                    && alert.severity.rank() >= channel.severity_threshold.rank()
                    && category
                        .map(|c| c.channels.is_empty() || c.channels.contains(kind))
                        .unwrap_or(true)
            })
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Deliver the alert to every eligible (recipient, channel) pair once.
    /// Failures below the retry cap come back as [`RetryRequest`]s for the
    /// engine to schedule.
    pub async fn fan_out(&self, alert: &Alert) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let recipients = self.recipients.recipients(alert).await;
        if recipients.is_empty() {
            debug!(alert = %alert.id, "No recipients resolved");
            return report;
        }

        for user_id in recipients {
            let prefs = self.preferences.get(&user_id).await;
            for channel in self.eligible_channels(&prefs, alert) {
                let (attempt, retry) = self.attempt(alert, &user_id, channel, 0).await;
                report.attempts.push(attempt);
                if let Some(retry) = retry {
                    report.retries.push(retry);
                }
            }
        }
        report
    }

    /// Deliver through an explicit channel list (escalation path), skipping
    /// preference eligibility: escalation channels were chosen by the
    /// user's escalation settings already.
    pub async fn deliver_via(
        &self,
        alert: &Alert,
        channels: &[ChannelKind],
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for user_id in self.recipients.recipients(alert).await {
            for &channel in channels {
                let (attempt, retry) = self.attempt(alert, &user_id, channel, 0).await;
                report.attempts.push(attempt);
                if let Some(retry) = retry {
                    report.retries.push(retry);
                }
            }
        }
        report
    }

    /// One delivery attempt for one (recipient, channel) pair.
    pub async fn attempt(
        &self,
        alert: &Alert,
        user_id: &str,
        channel: ChannelKind,
        retry_count: u32,
    ) -> (DeliveryAttempt, Option<RetryRequest>) {
        let outcome = match self.channels.get(&channel) {
            Some(adapter) => adapter.send(alert, user_id).await,
            None => Err(vigil_core::DeliveryError::NoAdapter(
                channel.as_str().to_string(),
            )),
        };

        match outcome {
            Ok(()) => {
                debug!(alert = %alert.id, user = %user_id, %channel, "Delivered");
                self.stats.lock().expect("dispatch lock poisoned").delivered += 1;
                (DeliveryAttempt::success(channel, user_id, retry_count), None)
            }
            Err(err) => {
                let mut stats = self.stats.lock().expect("dispatch lock poisoned");
                stats.failed += 1;

                let attempt =
                    DeliveryAttempt::failure(channel, user_id, err.to_string(), retry_count);
                if retry_count < self.config.max_retries {
                    stats.retries_scheduled += 1;
                    warn!(
                        alert = %alert.id, user = %user_id, %channel, retry_count,
                        "Delivery failed, scheduling retry: {err}"
                    );
                    let retry = RetryRequest {
                        alert_id: alert.id.clone(),
                        user_id: user_id.to_string(),
                        channel,
                        retry_count: retry_count + 1,
                        delay: Duration::from_secs(self.config.retry_delay_seconds),
                    };
                    (attempt, Some(retry))
                } else {
                    stats.terminal_failures += 1;
                    warn!(
                        alert = %alert.id, user = %user_id, %channel,
                        "Delivery failed after {} retries: {err}",
                        self.config.max_retries
                    );
                    (attempt, None)
                }
            }
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        *self.stats.lock().expect("dispatch lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_channel::{MockChannel, StaticRecipients};
    use vigil_core::{AlertDraft, AlertMetadata, AlertSeverity};

    fn alert(severity: AlertSeverity) -> Alert {
        Alert::from_draft(AlertDraft::new(
            "t",
            "m",
            severity,
            AlertMetadata::System {
                hostname: "h".into(),
                service: "s".into(),
                check: None,
            },
        ))
    }

    fn dispatcher(adapters: Vec<Arc<dyn ChannelAdapter>>) -> DeliveryDispatcher {
        DeliveryDispatcher::new(
            DispatchConfig::default(),
            adapters,
            Arc::new(StaticRecipients::single("alice")),
            Arc::new(PreferencesStore::new()),
        )
    }

    #[tokio::test]
    async fn test_severity_threshold_gates_channels() {
        let dispatcher = dispatcher(vec![]);
        let prefs = dispatcher.preferences.get("alice").await;

        // Defaults: in-app from low, push from medium, email from high.
        let low = dispatcher.eligible_channels(&prefs, &alert(AlertSeverity::Low));
        assert_eq!(low, vec![ChannelKind::InApp]);

        let high = dispatcher.eligible_channels(&prefs, &alert(AlertSeverity::High));
        assert!(high.contains(&ChannelKind::InApp));
        assert!(high.contains(&ChannelKind::Push));
        assert!(high.contains(&ChannelKind::Email));
        assert!(!high.contains(&ChannelKind::Sms));
    }

    #[tokio::test]
    async fn test_fan_out_records_success() {
        let in_app = Arc::new(MockChannel::new(ChannelKind::InApp));
        let dispatcher = dispatcher(vec![in_app.clone()]);

        let report = dispatcher.fan_out(&alert(AlertSeverity::Low)).await;
        assert_eq!(report.attempts.len(), 1);
        assert!(report.attempts[0].success);
        assert!(report.retries.is_empty());
        assert_eq!(in_app.send_count(), 1);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_failure_produces_retry_request() {
        let in_app = Arc::new(MockChannel::failing(ChannelKind::InApp, 1));
        let dispatcher = dispatcher(vec![in_app]);

        let report = dispatcher.fan_out(&alert(AlertSeverity::Low)).await;
        assert_eq!(report.attempts.len(), 1);
        assert!(!report.attempts[0].success);
        assert_eq!(report.retries.len(), 1);
        assert_eq!(report.retries[0].retry_count, 1);
        assert_eq!(dispatcher.stats().retries_scheduled, 1);
    }

    #[tokio::test]
    async fn test_retry_cap_is_terminal() {
        let in_app = Arc::new(MockChannel::failing(ChannelKind::InApp, 10));
        let dispatcher = dispatcher(vec![in_app]);
        let alert = alert(AlertSeverity::Low);

        // At the cap: no further retry, terminal failure recorded.
        let (attempt, retry) = dispatcher
            .attempt(&alert, "alice", ChannelKind::InApp, 3)
            .await;
        assert!(!attempt.success);
        assert!(retry.is_none());
        assert_eq!(dispatcher.stats().terminal_failures, 1);
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_without_panic() {
        let dispatcher = dispatcher(vec![]);
        let (attempt, retry) = dispatcher
            .attempt(&alert(AlertSeverity::Low), "alice", ChannelKind::Email, 0)
            .await;
        assert!(!attempt.success);
        assert!(attempt.error.as_deref().unwrap_or("").contains("email"));
        assert!(retry.is_some());
    }

    #[test]
    fn test_queue_batching_and_drain_flag() {
        let dispatcher = DeliveryDispatcher::new(
            DispatchConfig {
                batch_size: 2,
                ..Default::default()
            },
            vec![],
            Arc::new(StaticRecipients::single("alice")),
            Arc::new(PreferencesStore::new()),
        );

        dispatcher.enqueue("a");
        dispatcher.enqueue("b");
        dispatcher.enqueue("c");

        assert!(dispatcher.begin_drain());
        // Overlapping tick refused.
        assert!(!dispatcher.begin_drain());

        assert_eq!(dispatcher.take_batch(), vec!["a", "b"]);
        assert_eq!(dispatcher.take_batch(), vec!["c"]);
        assert!(dispatcher.take_batch().is_empty());

        dispatcher.end_drain();
        assert!(dispatcher.begin_drain());
    }
}

//! The alert engine: lifecycle state machine and command surface.
//!
//! [`AlertEngine`] owns the alert map and is the only writer to it. Every
//! command checks the lifecycle transition table before mutating, and every
//! mutation that changes the active set pushes a fresh snapshot to
//! subscribers. Timers (escalation, snooze expiry, queue-drain ticks,
//! delivery retries) hold only a `Weak` reference to the engine, so a
//! dropped engine quietly ends its timer callbacks instead of keeping
//! itself alive through them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use vigil_core::{
    Alert, AlertCategory, AlertDraft, AlertMetadata, AlertSeverity, AlertStatus,
    AvailabilityProvider, ChannelAdapter, DeliveryAttempt, KeyValueStore, Notification,
    RecipientResolver, Scheduler, TimerHandle, TimerTask, TokioScheduler, ValidationError,
};

use crate::analytics::{AnalyticsRecorder, InteractionAction, InteractionEvent};
use crate::config::EngineConfig;
use crate::dispatch::{DeliveryDispatcher, DeliveryStats, RetryRequest};
use crate::escalation::{EscalationDecision, EscalationScheduler};
use crate::grouping::GroupingManager;
use crate::preferences::PreferencesStore;
use crate::relevance::RelevanceFilter;

/// Subscriber token returned by [`AlertEngine::subscribe`].
pub type SubscriptionId = u64;

/// Aggregated alert counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub by_severity: BTreeMap<AlertSeverity, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<AlertCategory, usize>,
    pub delivery: DeliveryStats,
}

/// The engine. Construct through [`AlertEngine::builder`], then call
/// [`start`](AlertEngine::start) to arm the recurring ticks.
pub struct AlertEngine {
    config: EngineConfig,
    alerts: RwLock<HashMap<String, Alert>>,
    scheduler: Arc<dyn Scheduler>,
    dispatcher: Arc<DeliveryDispatcher>,
    escalation: Arc<EscalationScheduler>,
    preferences: Arc<PreferencesStore>,
    analytics: Arc<AnalyticsRecorder>,
    relevance: Arc<RelevanceFilter>,
    grouping: Arc<GroupingManager>,
    recipients: Arc<dyn RecipientResolver>,
    availability: Arc<dyn AvailabilityProvider>,
    snooze_timers: Mutex<HashMap<String, TimerHandle>>,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Vec<Alert>>>>,
    next_subscription: AtomicU64,
}

impl AlertEngine {
    /// Start building an engine around the two seams every deployment must
    /// provide: who receives alerts, and whether they are around.
    pub fn builder(
        recipients: Arc<dyn RecipientResolver>,
        availability: Arc<dyn AvailabilityProvider>,
    ) -> AlertEngineBuilder {
        AlertEngineBuilder {
            config: EngineConfig::default(),
            scheduler: None,
            store: None,
            adapters: Vec::new(),
            recipients,
            availability,
        }
    }

    /// Arm the recurring queue-drain and analytics-flush ticks.
    pub fn start(self: &Arc<Self>) {
        let tick = Duration::from_secs(self.config.dispatch.tick_seconds);
        if let Err(err) = self.scheduler.schedule(tick, self.dispatch_tick_task()) {
            warn!("Failed to arm dispatch tick: {err}");
        }

        let flush = Duration::from_secs(self.config.analytics.flush_interval_seconds);
        if let Err(err) = self.scheduler.schedule(flush, self.flush_tick_task()) {
            warn!("Failed to arm analytics flush tick: {err}");
        }
        info!("Alert engine started");
    }

    // ---- commands ----------------------------------------------------

    /// Create an alert: validated, stored, queued for delivery, and armed
    /// for escalation. Delivery failures never surface here.
    pub async fn create_alert(self: &Arc<Self>, draft: AlertDraft) -> Alert {
        let alert = Alert::from_draft(draft);
        info!(
            alert = %alert.id,
            severity = %alert.severity,
            category = %alert.category,
            "Created alert"
        );

        self.alerts
            .write()
            .await
            .insert(alert.id.clone(), alert.clone());
        self.dispatcher.enqueue(&alert.id);
        self.arm_escalation(&alert).await;
        self.notify_subscribers().await;
        alert
    }

    /// Acknowledge an alert. Returns false for unknown alerts and illegal
    /// transitions; acknowledging stops escalation but keeps the alert.
    pub async fn acknowledge_alert(self: &Arc<Self>, alert_id: &str, user_id: &str) -> bool {
        let acknowledged = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(alert_id) else {
                return false;
            };
            if !alert.status.can_transition(AlertStatus::Acknowledged) {
                debug!(alert = %alert_id, from = %alert.status, "Rejected acknowledge");
                return false;
            }
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_by = Some(user_id.to_string());
            alert.acknowledged_at = Some(Utc::now());
            alert.clone()
        };

        self.escalation.cancel(alert_id);
        self.record_lifecycle(&acknowledged, user_id, InteractionAction::Acknowledged)
            .await;
        self.notify_subscribers().await;
        true
    }

    /// Resolve an alert. Legal from any non-resolved status; resolution is
    /// terminal and cancels every timer the alert owns.
    pub async fn resolve_alert(self: &Arc<Self>, alert_id: &str, user_id: &str) -> bool {
        let resolved = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(alert_id) else {
                return false;
            };
            if !alert.status.can_transition(AlertStatus::Resolved) {
                return false;
            }
            alert.status = AlertStatus::Resolved;
            alert.resolved_by = Some(user_id.to_string());
            alert.resolved_at = Some(Utc::now());
            alert.snoozed_until = None;
            alert.clone()
        };

        self.escalation.cancel(alert_id);
        self.cancel_snooze_timer(alert_id);
        self.remove_notifications(&resolved).await;
        self.record_lifecycle(&resolved, user_id, InteractionAction::Resolved)
            .await;
        self.notify_subscribers().await;
        true
    }

    /// Snooze an alert for `duration_minutes` (0 means the user's default
    /// duration). Validated against the user's snooze preferences. Returns
    /// `Ok(false)` for unknown alerts and illegal transitions.
    pub async fn snooze_alert(
        self: &Arc<Self>,
        alert_id: &str,
        user_id: &str,
        duration_minutes: u32,
    ) -> Result<bool, ValidationError> {
        let prefs = self.preferences.get(user_id).await;
        let duration = if duration_minutes == 0 {
            prefs.snooze.default_duration_minutes
        } else {
            duration_minutes
        };
        if duration > prefs.snooze.max_duration_minutes {
            return Err(ValidationError::SnoozeTooLong {
                requested: duration,
                max: prefs.snooze.max_duration_minutes,
            });
        }

        let snoozed = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(alert_id) else {
                return Ok(false);
            };
            if !prefs.snooze.allowed_severities.contains(&alert.severity) {
                return Err(ValidationError::SnoozeNotAllowed(
                    alert.severity.as_str().to_string(),
                ));
            }
            if !alert.status.can_transition(AlertStatus::Snoozed) {
                return Ok(false);
            }
            alert.status = AlertStatus::Snoozed;
            alert.snoozed_until = Some(Utc::now() + chrono::Duration::minutes(i64::from(duration)));
            alert.clone()
        };

        self.escalation.cancel(alert_id);
        self.arm_snooze_timer(alert_id, Duration::from_secs(u64::from(duration) * 60));
        self.record_lifecycle(&snoozed, user_id, InteractionAction::Snoozed)
            .await;
        self.notify_subscribers().await;
        Ok(true)
    }

    /// Manually raise the escalation level, bypassing the availability
    /// policy (an operator decided the alert needs louder channels now).
    pub async fn escalate_alert(self: &Arc<Self>, alert_id: &str) -> bool {
        let Some(owner) = self.owner(alert_id).await else {
            return false;
        };
        let prefs = self.preferences.get(&owner).await;
        self.escalate_step(alert_id, &prefs.escalation).await
    }

    /// Forward a user interaction to analytics. Interactions feed dismissal
    /// patterns and suppress future escalation steps for the alert.
    pub async fn record_interaction(&self, event: InteractionEvent) {
        self.analytics.record(event).await;
    }

    /// Active (including escalated) alerts, most severe first, newest first
    /// within a severity.
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.status.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_at.cmp(&a.created_at))
        });
        active
    }

    /// Snapshot of one alert.
    pub async fn alert(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.read().await.get(alert_id).cloned()
    }

    pub async fn statistics(&self) -> AlertStats {
        let alerts = self.alerts.read().await;
        let mut stats = AlertStats {
            total: alerts.len(),
            delivery: self.dispatcher.stats(),
            ..Default::default()
        };
        for alert in alerts.values() {
            if alert.status.is_active() {
                stats.active += 1;
            }
            *stats.by_severity.entry(alert.severity).or_default() += 1;
            *stats
                .by_status
                .entry(alert.status.as_str().to_string())
                .or_default() += 1;
            *stats.by_category.entry(alert.category).or_default() += 1;
        }
        stats
    }

    /// Drop resolved alerts older than the retention window. Returns how
    /// many were purged.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days.0);
        let mut alerts = self.alerts.write().await;
        let before = alerts.len();
        alerts.retain(|_, alert| {
            alert.status != AlertStatus::Resolved
                || alert.resolved_at.is_none_or(|at| at > cutoff)
        });
        let purged = before - alerts.len();
        if purged > 0 {
            info!(purged, "Purged resolved alerts past retention");
        }
        purged
    }

    // ---- subscriptions -----------------------------------------------

    /// Subscribe to active-alert snapshots. The current snapshot is pushed
    /// immediately; every change to the active set pushes a fresh one.
    pub async fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Vec<Alert>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.active_alerts().await;
        let _ = tx.send(snapshot);
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .remove(&id);
    }

    async fn notify_subscribers(&self) {
        let snapshot = self.active_alerts().await;
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|_, tx| tx.send(snapshot.clone()).is_ok());
    }

    // ---- delivery ----------------------------------------------------

    /// Drain one batch from the delivery queue. Skips alerts that stopped
    /// being active between enqueue and drain.
    pub async fn process_queue(self: &Arc<Self>) {
        if !self.dispatcher.begin_drain() {
            return;
        }

        let batch = self.dispatcher.take_batch();
        for alert_id in batch {
            let Some(alert) = self.alert(&alert_id).await else {
                continue;
            };
            if !alert.status.is_active() {
                debug!(alert = %alert_id, status = %alert.status, "Skipping queued alert");
                continue;
            }

            let report = self.dispatcher.fan_out(&alert).await;
            for attempt in &report.attempts {
                self.record_delivery(&alert, attempt).await;
            }
            self.append_attempts(&alert_id, report.attempts).await;
            self.schedule_retries(report.retries);
            self.surface(&alert).await;
        }

        self.dispatcher.end_drain();
    }

    /// Re-attempt one failed (alert, recipient, channel) delivery.
    async fn retry_delivery(self: &Arc<Self>, request: RetryRequest) {
        let Some(alert) = self.alert(&request.alert_id).await else {
            return;
        };
        if alert.status == AlertStatus::Resolved {
            return;
        }

        let (attempt, retry) = self
            .dispatcher
            .attempt(&alert, &request.user_id, request.channel, request.retry_count)
            .await;
        self.record_delivery(&alert, &attempt).await;
        self.append_attempts(&request.alert_id, vec![attempt]).await;
        if let Some(retry) = retry {
            self.schedule_retries(vec![retry]);
        }
    }

    fn schedule_retries(self: &Arc<Self>, retries: Vec<RetryRequest>) {
        for request in retries {
            let weak = Arc::downgrade(self);
            let delay = request.delay;
            let alert_id = request.alert_id.clone();
            let scheduled = self.scheduler.schedule(
                delay,
                Box::pin(async move {
                    if let Some(engine) = weak.upgrade() {
                        engine.retry_delivery(request).await;
                    }
                }),
            );
            if let Err(err) = scheduled {
                warn!(alert = %alert_id, "Failed to schedule delivery retry: {err}");
            }
        }
    }

    async fn append_attempts(&self, alert_id: &str, attempts: Vec<DeliveryAttempt>) {
        if attempts.is_empty() {
            return;
        }
        let mut alerts = self.alerts.write().await;
        if let Some(alert) = alerts.get_mut(alert_id) {
            alert.delivery_attempts.extend(attempts);
        }
    }

    async fn record_delivery(&self, alert: &Alert, attempt: &DeliveryAttempt) {
        let action = if attempt.success {
            InteractionAction::Delivered
        } else {
            InteractionAction::DeliveryFailed
        };
        self.analytics
            .record(InteractionEvent::new(
                &attempt.user_id,
                &alert.id,
                alert.category,
                alert_kind(alert),
                action,
            ))
            .await;
    }

    /// Surface the alert as per-user notifications: relevance-filtered,
    /// grouped, and recorded as shown.
    async fn surface(&self, alert: &Alert) {
        for user_id in self.recipients.recipients(alert).await {
            let notification = Notification::new(
                format!("{}:{}", alert.id, user_id),
                &user_id,
                &alert.title,
                alert.category,
                alert_kind(alert),
                alert.priority(),
            );
            if self.relevance.should_show(&notification).await {
                self.relevance.note_shown(&notification).await;
                self.grouping.add(notification).await;
                self.analytics
                    .record(InteractionEvent::new(
                        &user_id,
                        &alert.id,
                        alert.category,
                        alert_kind(alert),
                        InteractionAction::Shown,
                    ))
                    .await;
            }
        }
    }

    async fn remove_notifications(&self, alert: &Alert) {
        for user_id in self.recipients.recipients(alert).await {
            self.grouping
                .remove_notification(&format!("{}:{}", alert.id, user_id))
                .await;
        }
    }

    // ---- escalation --------------------------------------------------

    /// The user whose preferences govern an alert's escalation: the first
    /// resolved recipient.
    async fn owner(&self, alert_id: &str) -> Option<String> {
        let alert = self.alert(alert_id).await?;
        self.recipients.recipients(&alert).await.into_iter().next()
    }

    async fn arm_escalation(self: &Arc<Self>, alert: &Alert) {
        let Some(owner) = self.recipients.recipients(alert).await.into_iter().next() else {
            return;
        };
        let prefs = self.preferences.get(&owner).await;
        if !prefs.escalation.enabled {
            return;
        }
        let delay = EscalationScheduler::delay_for(&prefs.escalation, alert);
        self.escalation
            .arm(&alert.id, delay, self.escalation_task(alert.id.clone()));
    }

    fn escalation_task(self: &Arc<Self>, alert_id: String) -> TimerTask {
        let weak = Arc::downgrade(self);
        Box::pin(async move {
            if let Some(engine) = weak.upgrade() {
                engine.on_escalation_fire(&alert_id).await;
            }
        })
    }

    /// An escalation timer fired. Re-check state under the policy and
    /// either step, re-arm, or stop.
    async fn on_escalation_fire(self: &Arc<Self>, alert_id: &str) {
        self.escalation.clear_fired(alert_id);

        let Some(alert) = self.alert(alert_id).await else {
            return;
        };
        // The alert may have been acknowledged, resolved, or snoozed while
        // the timer was in flight.
        if !alert.status.is_active() {
            debug!(alert = %alert_id, status = %alert.status, "Escalation fired on settled alert");
            return;
        }
        let Some(owner) = self.recipients.recipients(&alert).await.into_iter().next() else {
            return;
        };

        let prefs = self.preferences.get(&owner).await;
        let availability = self.availability.availability(&owner).await;
        let interacted = self.analytics.has_interacted(&owner, alert_id).await;
        let decision =
            self.escalation
                .decide(&alert, &prefs.escalation, &availability, interacted, Utc::now());

        match decision {
            EscalationDecision::Proceed => {
                self.escalate_step(alert_id, &prefs.escalation).await;
            }
            EscalationDecision::Recheck(delay) => {
                debug!(alert = %alert_id, ?delay, "Escalation deferred, user away");
                self.escalation
                    .arm(alert_id, delay, self.escalation_task(alert_id.to_string()));
            }
            EscalationDecision::Suppress(reason) => {
                info!(alert = %alert_id, reason, "Escalation suppressed");
            }
        }
    }

    /// Raise the escalation level by one and deliver through the owner's
    /// escalation channels for the new level.
    async fn escalate_step(
        self: &Arc<Self>,
        alert_id: &str,
        prefs: &crate::preferences::EscalationPreferences,
    ) -> bool {
        let escalated = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(alert_id) else {
                return false;
            };
            if !alert.status.can_transition(AlertStatus::Escalated)
                || alert.escalation_level >= prefs.max_escalation_level
            {
                return false;
            }
            alert.status = AlertStatus::Escalated;
            alert.escalation_level += 1;
            alert.clone()
        };

        info!(
            alert = %alert_id,
            level = escalated.escalation_level,
            "Escalated alert"
        );
        self.escalation.note_escalation(escalated.category, Utc::now());

        let channels = EscalationScheduler::channels_for_level(prefs, escalated.escalation_level);
        let report = self.dispatcher.deliver_via(&escalated, &channels).await;
        for attempt in &report.attempts {
            self.record_delivery(&escalated, attempt).await;
        }
        self.append_attempts(alert_id, report.attempts).await;
        self.schedule_retries(report.retries);

        if escalated.escalation_level < prefs.max_escalation_level {
            let delay = EscalationScheduler::delay_for(prefs, &escalated);
            self.escalation
                .arm(alert_id, delay, self.escalation_task(alert_id.to_string()));
        }
        self.notify_subscribers().await;
        true
    }

    // ---- snooze ------------------------------------------------------

    fn arm_snooze_timer(self: &Arc<Self>, alert_id: &str, delay: Duration) {
        let weak = Arc::downgrade(self);
        let id = alert_id.to_string();
        let handle = match self.scheduler.schedule(
            delay,
            Box::pin(async move {
                if let Some(engine) = weak.upgrade() {
                    engine.on_snooze_expire(&id).await;
                }
            }),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(alert = %alert_id, "Failed to arm snooze timer: {err}");
                return;
            }
        };
        let mut timers = self.snooze_timers.lock().expect("snooze lock poisoned");
        if let Some(previous) = timers.insert(alert_id.to_string(), handle) {
            self.scheduler.cancel(&previous);
        }
    }

    fn cancel_snooze_timer(&self, alert_id: &str) {
        let removed = self
            .snooze_timers
            .lock()
            .expect("snooze lock poisoned")
            .remove(alert_id);
        if let Some(handle) = removed {
            self.scheduler.cancel(&handle);
        }
    }

    /// A snooze expired: reactivate the alert and re-arm escalation from
    /// the current level.
    async fn on_snooze_expire(self: &Arc<Self>, alert_id: &str) {
        self.snooze_timers
            .lock()
            .expect("snooze lock poisoned")
            .remove(alert_id);

        let reactivated = {
            let mut alerts = self.alerts.write().await;
            let Some(alert) = alerts.get_mut(alert_id) else {
                return;
            };
            if alert.status != AlertStatus::Snoozed {
                return;
            }
            alert.status = AlertStatus::Active;
            alert.snoozed_until = None;
            alert.clone()
        };

        info!(alert = %alert_id, "Snooze expired, alert reactivated");
        self.arm_escalation(&reactivated).await;
        self.notify_subscribers().await;
    }

    // ---- ticks -------------------------------------------------------

    fn dispatch_tick_task(self: &Arc<Self>) -> TimerTask {
        let weak = Arc::downgrade(self);
        let tick = Duration::from_secs(self.config.dispatch.tick_seconds);
        Box::pin(async move {
            if let Some(engine) = weak.upgrade() {
                engine.process_queue().await;
                engine.purge_expired().await;
                let next = engine.scheduler.schedule(tick, engine.dispatch_tick_task());
                if let Err(err) = next {
                    warn!("Failed to re-arm dispatch tick: {err}");
                }
            }
        })
    }

    fn flush_tick_task(self: &Arc<Self>) -> TimerTask {
        let weak = Arc::downgrade(self);
        let flush = Duration::from_secs(self.config.analytics.flush_interval_seconds);
        Box::pin(async move {
            if let Some(engine) = weak.upgrade() {
                engine.analytics.flush().await;
                let next = engine.scheduler.schedule(flush, engine.flush_tick_task());
                if let Err(err) = next {
                    warn!("Failed to re-arm analytics flush tick: {err}");
                }
            }
        })
    }

    // ---- helpers -----------------------------------------------------

    async fn record_lifecycle(&self, alert: &Alert, user_id: &str, action: InteractionAction) {
        self.analytics
            .record(InteractionEvent::new(
                user_id,
                &alert.id,
                alert.category,
                alert_kind(alert),
                action,
            ))
            .await;
    }

    pub fn preferences(&self) -> &Arc<PreferencesStore> {
        &self.preferences
    }

    pub fn analytics(&self) -> &Arc<AnalyticsRecorder> {
        &self.analytics
    }

    pub fn grouping(&self) -> &Arc<GroupingManager> {
        &self.grouping
    }

    pub fn relevance(&self) -> &Arc<RelevanceFilter> {
        &self.relevance
    }
}

/// The discriminating detail of an alert's metadata, used as the analytics
/// "kind" within the category.
fn alert_kind(alert: &Alert) -> String {
    match &alert.metadata {
        AlertMetadata::System { check, service, .. } => {
            check.clone().unwrap_or_else(|| service.clone())
        }
        AlertMetadata::Security { rule, .. } => rule.clone(),
        AlertMetadata::Performance { metric, .. } => metric.clone(),
        AlertMetadata::Deployment { environment, .. } => environment.clone(),
        AlertMetadata::Maintenance { component, .. } => component.clone(),
    }
}

/// Builder for [`AlertEngine`].
pub struct AlertEngineBuilder {
    config: EngineConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
    store: Option<Arc<dyn KeyValueStore>>,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    recipients: Arc<dyn RecipientResolver>,
    availability: Arc<dyn AvailabilityProvider>,
}

impl AlertEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the timer scheduler (defaults to tokio timers).
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Durable store for preferences, patterns, and analytics batches.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a channel adapter. One adapter per channel kind; a later
    /// registration for the same kind replaces the earlier one.
    pub fn adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> Arc<AlertEngine> {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));

        let preferences = Arc::new(match &self.store {
            Some(store) => PreferencesStore::with_store(Arc::clone(store)),
            None => PreferencesStore::new(),
        });
        let analytics = Arc::new(match &self.store {
            Some(store) => {
                AnalyticsRecorder::with_store(self.config.analytics.clone(), Arc::clone(store))
            }
            None => AnalyticsRecorder::new(self.config.analytics.clone()),
        });
        let relevance = Arc::new(RelevanceFilter::new(
            self.config.relevance.clone(),
            Arc::clone(&preferences),
            Arc::clone(&analytics),
            Arc::clone(&self.availability),
        ));
        let grouping = Arc::new(GroupingManager::new(Arc::clone(&preferences)));
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            self.config.dispatch.clone(),
            self.adapters,
            Arc::clone(&self.recipients),
            Arc::clone(&preferences),
        ));
        let escalation = Arc::new(EscalationScheduler::new(Arc::clone(&scheduler)));

        Arc::new(AlertEngine {
            config: self.config,
            alerts: RwLock::new(HashMap::new()),
            scheduler,
            dispatcher,
            escalation,
            preferences,
            analytics,
            relevance,
            grouping,
            recipients: self.recipients,
            availability: self.availability,
            snooze_timers: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        })
    }
}

//! Relevance filtering.
//!
//! Decides whether a notification should surface for a user right now,
//! combining the learned dismissal pattern, current availability, priority,
//! recent-notification fatigue, and quiet hours. All weights live in
//! [`RelevanceConfig`]; see `config.rs`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use vigil_core::{
    AlertCategory, AvailabilityProvider, AvailabilityStatus, Notification, NotificationPriority,
};

use crate::analytics::{AnalyticsRecorder, DismissalPattern};
use crate::config::RelevanceConfig;
use crate::preferences::PreferencesStore;

/// Bound on the recent-shown memory; old entries are pruned on insert.
const RECENT_SHOWN_CAP: usize = 256;

struct ShownRecord {
    user_id: String,
    category: AlertCategory,
    kind: String,
    shown_at: DateTime<Utc>,
}

/// Decides whether and when notifications surface.
pub struct RelevanceFilter {
    config: RelevanceConfig,
    preferences: Arc<PreferencesStore>,
    analytics: Arc<AnalyticsRecorder>,
    availability: Arc<dyn AvailabilityProvider>,
    recent_shown: Mutex<VecDeque<ShownRecord>>,
}

impl RelevanceFilter {
    pub fn new(
        config: RelevanceConfig,
        preferences: Arc<PreferencesStore>,
        analytics: Arc<AnalyticsRecorder>,
        availability: Arc<dyn AvailabilityProvider>,
    ) -> Self {
        Self {
            config,
            preferences,
            analytics,
            availability,
            recent_shown: Mutex::new(VecDeque::new()),
        }
    }

    /// Whether `notification` should surface for its user right now.
    ///
    /// Quiet hours veto everything except urgent notifications when the
    /// user opted into `allow_urgent`. Otherwise the relevance score must
    /// reach the priority-dependent threshold.
    pub async fn should_show(&self, notification: &Notification) -> bool {
        let now = Utc::now();
        let prefs = self.preferences.get(&notification.user_id).await;

        if let Some(quiet) = &prefs.quiet_hours {
            if quiet.contains(now) {
                let urgent_escape = notification.priority == NotificationPriority::Urgent
                    && quiet.allow_urgent;
                if !urgent_escape {
                    debug!(
                        user = %notification.user_id,
                        id = %notification.id,
                        "Suppressed by quiet hours"
                    );
                    return false;
                }
            }
        }

        let availability = self
            .availability
            .availability(&notification.user_id)
            .await;
        let pattern = self
            .analytics
            .pattern(&notification.user_id, notification.category, &notification.kind)
            .await;
        let similar = self.recent_similar(notification, now).await;

        let score = self.score(
            notification.priority,
            pattern.as_ref(),
            availability.status,
            similar,
        );
        let threshold = self.config.threshold.get(notification.priority);

        debug!(
            user = %notification.user_id,
            id = %notification.id,
            score,
            threshold,
            "Relevance decision"
        );
        score >= threshold
    }

    /// Compute the relevance score in [0, 1].
    pub fn score(
        &self,
        priority: NotificationPriority,
        pattern: Option<&DismissalPattern>,
        availability: AvailabilityStatus,
        recent_similar: usize,
    ) -> f64 {
        let cfg = &self.config;
        let mut score = cfg.base_score;

        if let Some(pattern) = pattern {
            score -= cfg.dismissal_weight * pattern.dismissal_rate;
            if pattern.average_time_to_action_ms > 0.0
                && pattern.average_time_to_action_ms < cfg.quick_action_cutoff_ms
            {
                score += cfg.quick_action_bonus;
            }
        }

        match availability {
            AvailabilityStatus::Available => score += cfg.available_bonus,
            AvailabilityStatus::DoNotDisturb => score -= cfg.do_not_disturb_penalty,
            AvailabilityStatus::Busy | AvailabilityStatus::Away => {}
        }

        score += cfg.priority_bonus.get(priority);

        if recent_similar > cfg.fatigue_threshold {
            score -= cfg.fatigue_penalty;
        }

        score.clamp(0.0, 1.0)
    }

    /// Record that a notification surfaced, feeding the fatigue term.
    pub async fn note_shown(&self, notification: &Notification) {
        let mut recent = self.recent_shown.lock().await;
        recent.push_back(ShownRecord {
            user_id: notification.user_id.clone(),
            category: notification.category,
            kind: notification.kind.clone(),
            shown_at: Utc::now(),
        });
        if recent.len() > RECENT_SHOWN_CAP {
            recent.pop_front();
        }
    }

    async fn recent_similar(&self, notification: &Notification, now: DateTime<Utc>) -> usize {
        let window = Duration::minutes(self.config.fatigue_window_minutes);
        let mut recent = self.recent_shown.lock().await;
        recent.retain(|r| now - r.shown_at <= window);
        recent
            .iter()
            .filter(|r| {
                r.user_id == notification.user_id
                    && r.category == notification.category
                    && r.kind == notification.kind
            })
            .count()
    }
}

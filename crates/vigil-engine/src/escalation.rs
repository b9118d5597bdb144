//! Escalation scheduling and policy.
//!
//! Every active alert owns at most one escalation timer. When a timer
//! fires, the policy in [`EscalationScheduler::decide`] weighs severity,
//! user availability, prior interaction, and category fatigue before the
//! engine raises the escalation level and re-delivers through the user's
//! escalation channels. Acknowledge, resolve, and snooze all cancel the
//! timer; cancellation is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vigil_core::{
    Alert, AlertCategory, AlertSeverity, AvailabilityStatus, ChannelKind, Scheduler, TimerHandle,
    TimerTask, UserAvailability,
};

use crate::preferences::EscalationPreferences;

/// More than this many escalations per category per hour triggers fatigue
/// suppression.
const FATIGUE_LIMIT: usize = 2;

/// How long to wait before re-checking an away user.
const AWAY_RECHECK: Duration = Duration::from_secs(30 * 60);

/// What to do when an escalation timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Raise the level and deliver through the escalation channels.
    Proceed,
    /// Hold the level and fire again after the given delay.
    Recheck(Duration),
    /// Stop escalating this alert.
    Suppress(&'static str),
}

/// Owns escalation timers and the escalation policy.
pub struct EscalationScheduler {
    scheduler: Arc<dyn Scheduler>,
    timers: Mutex<HashMap<String, TimerHandle>>,
    recent: Mutex<HashMap<AlertCategory, Vec<DateTime<Utc>>>>,
}

impl EscalationScheduler {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            timers: Mutex::new(HashMap::new()),
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Delay until the next escalation step: the per-severity base delay
    /// scaled by the step number, so each level waits longer than the last.
    pub fn delay_for(prefs: &EscalationPreferences, alert: &Alert) -> Duration {
        let minutes = u64::from(prefs.delay_minutes.get(alert.severity));
        let step = u64::from(alert.escalation_level) + 1;
        Duration::from_secs(minutes * 60 * step)
    }

    /// Channels for escalation level `level`: the first `level` entries of
    /// the user's escalation channel ladder.
    pub fn channels_for_level(prefs: &EscalationPreferences, level: u32) -> Vec<ChannelKind> {
        let n = (level as usize).min(prefs.channels.len());
        prefs.channels[..n].to_vec()
    }

    /// Arm (or re-arm) the escalation timer for an alert. Any existing
    /// timer for the alert is cancelled first. A scheduling fault is
    /// logged and leaves the alert's level untouched.
    pub fn arm(&self, alert_id: &str, delay: Duration, task: TimerTask) {
        let handle = match self.scheduler.schedule(delay, task) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(alert = %alert_id, "Failed to arm escalation timer: {err}");
                return;
            }
        };
        let mut timers = self.timers.lock().expect("escalation lock poisoned");
        if let Some(previous) = timers.insert(alert_id.to_string(), handle) {
            self.scheduler.cancel(&previous);
        }
        debug!(alert = %alert_id, ?delay, "Armed escalation timer");
    }

    /// Cancel the escalation timer for an alert, if any.
    pub fn cancel(&self, alert_id: &str) {
        let removed = self
            .timers
            .lock()
            .expect("escalation lock poisoned")
            .remove(alert_id);
        if let Some(handle) = removed {
            self.scheduler.cancel(&handle);
            debug!(alert = %alert_id, "Cancelled escalation timer");
        }
    }

    /// Drop the stored handle after its timer fired, without cancelling.
    pub fn clear_fired(&self, alert_id: &str) {
        self.timers
            .lock()
            .expect("escalation lock poisoned")
            .remove(alert_id);
    }

    /// Whether an alert currently has a pending escalation timer.
    pub fn is_armed(&self, alert_id: &str) -> bool {
        self.timers
            .lock()
            .expect("escalation lock poisoned")
            .contains_key(alert_id)
    }

    /// Record that a category escalated, feeding the fatigue window.
    pub fn note_escalation(&self, category: AlertCategory, now: DateTime<Utc>) {
        self.recent
            .lock()
            .expect("escalation lock poisoned")
            .entry(category)
            .or_default()
            .push(now);
    }

    /// Whether the category has exceeded its hourly escalation allowance.
    pub fn is_fatigued(&self, category: AlertCategory, now: DateTime<Utc>) -> bool {
        let mut recent = self.recent.lock().expect("escalation lock poisoned");
        let Some(times) = recent.get_mut(&category) else {
            return false;
        };
        times.retain(|t| now.signed_duration_since(*t) < chrono::Duration::hours(1));
        times.len() > FATIGUE_LIMIT
    }

    /// Policy applied when an escalation timer fires.
    ///
    /// Reaching the level cap, prior user interaction, and category
    /// fatigue all suppress regardless of severity. Past those gates,
    /// critical alerts escalate no matter the user's availability;
    /// otherwise an away user gets a recheck instead of a step, a busy
    /// user only receives high-severity escalations that are already past
    /// the first level, and do-not-disturb suppresses outright.
    pub fn decide(
        &self,
        alert: &Alert,
        prefs: &EscalationPreferences,
        availability: &UserAvailability,
        interacted: bool,
        now: DateTime<Utc>,
    ) -> EscalationDecision {
        if !prefs.enabled {
            return EscalationDecision::Suppress("escalation disabled");
        }
        if alert.escalation_level >= prefs.max_escalation_level {
            return EscalationDecision::Suppress("max level reached");
        }
        if interacted {
            return EscalationDecision::Suppress("user already interacted");
        }

        if self.is_fatigued(alert.category, now) {
            return EscalationDecision::Suppress("category fatigued");
        }

        // Critical severity overrides availability, not the gates above.
        if alert.severity == AlertSeverity::Critical {
            return EscalationDecision::Proceed;
        }

        match availability.status {
            AvailabilityStatus::Available => EscalationDecision::Proceed,
            AvailabilityStatus::Away => EscalationDecision::Recheck(AWAY_RECHECK),
            AvailabilityStatus::Busy => {
                if alert.severity >= AlertSeverity::High && alert.escalation_level > 0 {
                    EscalationDecision::Proceed
                } else {
                    EscalationDecision::Suppress("user busy")
                }
            }
            AvailabilityStatus::DoNotDisturb => EscalationDecision::Suppress("do not disturb"),
        }
    }
}

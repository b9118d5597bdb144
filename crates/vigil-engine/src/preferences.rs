//! Per-user notification preferences.
//!
//! Preferences are created lazily with defaults on first access, mutated
//! only through validated partial updates, and never deleted during normal
//! operation. The store keeps a warm in-memory map and writes through to an
//! optional durable key-value store, logging (not failing) on persistence
//! errors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use vigil_core::{
    AlertCategory, AlertSeverity, ChannelKind, KeyValueStore, NotificationPriority,
    ValidationError,
};

/// How deliveries on a channel are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFrequency {
    Immediate,
    Batched,
    Digest,
}

/// Per-channel delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub enabled: bool,
    /// Minimum severity delivered on this channel.
    pub severity_threshold: AlertSeverity,
    pub frequency: DeliveryFrequency,
    pub batch_interval_minutes: u32,
}

impl ChannelPreference {
    pub fn immediate(enabled: bool, severity_threshold: AlertSeverity) -> Self {
        Self {
            enabled,
            severity_threshold,
            frequency: DeliveryFrequency::Immediate,
            batch_interval_minutes: 0,
        }
    }
}

/// Per-category settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub enabled: bool,
    /// Channels this category may use. Empty means "any enabled channel".
    pub channels: BTreeSet<ChannelKind>,
    /// Minimum priority surfaced for this category.
    pub min_priority: NotificationPriority,
}

impl Default for CategoryPreference {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: BTreeSet::new(),
            min_priority: NotificationPriority::Low,
        }
    }
}

/// Category lists per pacing tier. A category may appear in at most one
/// tier; categories in no tier follow their channels' frequency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyTiers {
    #[serde(default)]
    pub immediate: Vec<AlertCategory>,
    #[serde(default)]
    pub batched: Vec<AlertCategory>,
    #[serde(default)]
    pub digest: Vec<AlertCategory>,
}

/// Escalation delay per severity, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityDelays {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl SeverityDelays {
    pub fn get(&self, severity: AlertSeverity) -> u32 {
        match severity {
            AlertSeverity::Low => self.low,
            AlertSeverity::Medium => self.medium,
            AlertSeverity::High => self.high,
            AlertSeverity::Critical => self.critical,
        }
    }
}

impl Default for SeverityDelays {
    fn default() -> Self {
        Self {
            low: 240,
            medium: 120,
            high: 30,
            critical: 5,
        }
    }
}

/// Escalation behavior for a user's alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPreferences {
    pub enabled: bool,
    pub delay_minutes: SeverityDelays,
    pub max_escalation_level: u32,
    /// Escalation level n delivers through the first n of these.
    pub channels: Vec<ChannelKind>,
}

impl Default for EscalationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_minutes: SeverityDelays::default(),
            max_escalation_level: 3,
            channels: vec![ChannelKind::Push, ChannelKind::Sms, ChannelKind::Email],
        }
    }
}

/// Snooze limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnoozePreferences {
    pub default_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub allowed_severities: BTreeSet<AlertSeverity>,
}

impl Default for SnoozePreferences {
    fn default() -> Self {
        Self {
            default_duration_minutes: 30,
            max_duration_minutes: 480,
            allowed_severities: [AlertSeverity::Low, AlertSeverity::Medium, AlertSeverity::High]
                .into_iter()
                .collect(),
        }
    }
}

/// A daily window during which only urgent notifications may surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    /// HH:mm, local to `timezone`.
    pub start: String,
    /// HH:mm, local to `timezone`. May be earlier than `start` for windows
    /// spanning midnight.
    pub end: String,
    /// IANA timezone name.
    pub timezone: String,
    /// Whether urgent notifications may still surface inside the window.
    pub allow_urgent: bool,
}

impl QuietHours {
    fn parse_time(value: &str) -> Result<NaiveTime, ValidationError> {
        NaiveTime::parse_from_str(value, "%H:%M")
            .map_err(|_| ValidationError::InvalidTime(value.to_string()))
    }

    fn parse_timezone(&self) -> Result<Tz, ValidationError> {
        self.timezone
            .parse()
            .map_err(|_| ValidationError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        Self::parse_time(&self.start)?;
        Self::parse_time(&self.end)?;
        self.parse_timezone()?;
        Ok(())
    }

    /// Whether `now` falls inside the window. Windows where end < start
    /// wrap around midnight. Returns false if the fields fail to parse
    /// (they are validated on the way in; fail open rather than suppress).
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let (Ok(start), Ok(end), Ok(tz)) = (
            Self::parse_time(&self.start),
            Self::parse_time(&self.end),
            self.parse_timezone(),
        ) else {
            return false;
        };

        let local = now.with_timezone(&tz).time();
        if start <= end {
            local >= start && local < end
        } else {
            local >= start || local < end
        }
    }
}

/// Grouping window settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingPreferences {
    /// Time-bucket width for notification groups, minutes.
    pub window_minutes: u32,
}

impl Default for GroupingPreferences {
    fn default() -> Self {
        Self { window_minutes: 60 }
    }
}

/// Validated per-user notification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: String,
    pub channels: BTreeMap<ChannelKind, ChannelPreference>,
    pub categories: BTreeMap<AlertCategory, CategoryPreference>,
    #[serde(default)]
    pub frequency_tiers: FrequencyTiers,
    pub escalation: EscalationPreferences,
    pub snooze: SnoozePreferences,
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub grouping: GroupingPreferences,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    /// Default preferences for a user: in-app everything, push from medium,
    /// email from high, SMS reserved for escalation.
    pub fn default_for(user_id: impl Into<String>) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(
            ChannelKind::InApp,
            ChannelPreference::immediate(true, AlertSeverity::Low),
        );
        channels.insert(
            ChannelKind::Push,
            ChannelPreference::immediate(true, AlertSeverity::Medium),
        );
        channels.insert(
            ChannelKind::Email,
            ChannelPreference::immediate(true, AlertSeverity::High),
        );
        channels.insert(
            ChannelKind::Sms,
            ChannelPreference::immediate(false, AlertSeverity::Critical),
        );
        channels.insert(
            ChannelKind::Webhook,
            ChannelPreference::immediate(false, AlertSeverity::Low),
        );

        let categories = AlertCategory::all()
            .into_iter()
            .map(|c| (c, CategoryPreference::default()))
            .collect();

        Self {
            user_id: user_id.into(),
            channels,
            categories,
            frequency_tiers: FrequencyTiers::default(),
            escalation: EscalationPreferences::default(),
            snooze: SnoozePreferences::default(),
            quiet_hours: None,
            grouping: GroupingPreferences::default(),
            updated_at: Utc::now(),
        }
    }

    /// Structural validation. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.is_empty() {
            return Err(ValidationError::Empty("user_id"));
        }

        if let Some(quiet) = &self.quiet_hours {
            quiet.validate()?;
        }

        if self.escalation.enabled && self.escalation.max_escalation_level == 0 {
            return Err(ValidationError::NoEscalationLevels);
        }

        if self.snooze.default_duration_minutes > self.snooze.max_duration_minutes {
            return Err(ValidationError::SnoozeDefaultOverMax {
                default: self.snooze.default_duration_minutes,
                max: self.snooze.max_duration_minutes,
            });
        }

        // A category may appear in at most one frequency tier.
        let mut seen: BTreeSet<AlertCategory> = BTreeSet::new();
        for category in self
            .frequency_tiers
            .immediate
            .iter()
            .chain(&self.frequency_tiers.batched)
            .chain(&self.frequency_tiers.digest)
        {
            if !seen.insert(*category) {
                return Err(ValidationError::DuplicateFrequencyTier(
                    category.as_str().to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Automatic adjustments applied after every update:
    /// security notifications are force-enabled at high priority and above,
    /// and every enabled category keeps at least one channel route so
    /// urgent notifications always have somewhere to go.
    pub fn apply_adjustments(&mut self) {
        let security = self
            .categories
            .entry(AlertCategory::Security)
            .or_default();
        security.enabled = true;
        if security.min_priority > NotificationPriority::High {
            security.min_priority = NotificationPriority::High;
        }

        for pref in self.categories.values_mut() {
            if pref.enabled && !pref.channels.is_empty() {
                continue;
            }
            if pref.enabled && pref.channels.is_empty() {
                // Empty already means "any enabled channel"; nothing to do
                // unless every channel is disabled.
                if !self.channels.values().any(|c| c.enabled) {
                    pref.channels.insert(ChannelKind::InApp);
                }
            }
        }
        // The in-app channel itself stays enabled as the route of last resort.
        if !self.channels.values().any(|c| c.enabled) {
            self.channels.insert(
                ChannelKind::InApp,
                ChannelPreference::immediate(true, AlertSeverity::Low),
            );
        }
    }
}

/// Partial update; every section is optional and replaces the whole
/// section when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    pub channels: Option<BTreeMap<ChannelKind, ChannelPreference>>,
    pub categories: Option<BTreeMap<AlertCategory, CategoryPreference>>,
    pub frequency_tiers: Option<FrequencyTiers>,
    pub escalation: Option<EscalationPreferences>,
    pub snooze: Option<SnoozePreferences>,
    /// `Some(None)` clears quiet hours; `None` leaves them untouched.
    pub quiet_hours: Option<Option<QuietHours>>,
    pub grouping: Option<GroupingPreferences>,
}

/// Preference storage for all users.
///
/// Thread-safe map from user id to validated preferences, optionally backed
/// by a durable key-value store for persistence across restarts.
pub struct PreferencesStore {
    prefs: RwLock<HashMap<String, NotificationPreferences>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl Default for PreferencesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferencesStore {
    /// Create an in-memory-only store.
    pub fn new() -> Self {
        Self {
            prefs: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a store backed by a durable key-value store.
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            prefs: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    fn storage_key(user_id: &str) -> String {
        format!("prefs:{user_id}")
    }

    /// Get a user's preferences, creating defaults on first access.
    pub async fn get(&self, user_id: &str) -> NotificationPreferences {
        if let Some(prefs) = self.prefs.read().await.get(user_id).cloned() {
            return prefs;
        }

        if let Some(store) = &self.store {
            match store.get(&Self::storage_key(user_id)).await {
                Ok(Some(value)) => match serde_json::from_value(value) {
                    Ok(prefs) => {
                        let prefs: NotificationPreferences = prefs;
                        self.prefs
                            .write()
                            .await
                            .insert(user_id.to_string(), prefs.clone());
                        return prefs;
                    }
                    Err(err) => {
                        warn!("Discarding malformed stored preferences for {user_id}: {err}");
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    warn!("Failed to load preferences for {user_id}: {err}");
                }
            }
        }

        let mut prefs = NotificationPreferences::default_for(user_id);
        prefs.apply_adjustments();
        self.prefs
            .write()
            .await
            .insert(user_id.to_string(), prefs.clone());
        prefs
    }

    /// Apply a validated partial update and return the new preferences.
    pub async fn update(
        &self,
        user_id: &str,
        update: PreferencesUpdate,
    ) -> Result<NotificationPreferences, ValidationError> {
        let mut prefs = self.get(user_id).await;

        if let Some(channels) = update.channels {
            prefs.channels = channels;
        }
        if let Some(categories) = update.categories {
            prefs.categories = categories;
        }
        if let Some(tiers) = update.frequency_tiers {
            prefs.frequency_tiers = tiers;
        }
        if let Some(escalation) = update.escalation {
            prefs.escalation = escalation;
        }
        if let Some(snooze) = update.snooze {
            prefs.snooze = snooze;
        }
        if let Some(quiet_hours) = update.quiet_hours {
            prefs.quiet_hours = quiet_hours;
        }
        if let Some(grouping) = update.grouping {
            prefs.grouping = grouping;
        }

        prefs.validate()?;
        prefs.apply_adjustments();
        prefs.updated_at = Utc::now();

        self.prefs
            .write()
            .await
            .insert(user_id.to_string(), prefs.clone());
        self.persist(&prefs).await;
        Ok(prefs)
    }

    /// Export a user's preferences as a JSON value.
    pub async fn export(&self, user_id: &str) -> serde_json::Value {
        // Defaults exist for every user, so export never fails.
        serde_json::to_value(self.get(user_id).await).unwrap_or(serde_json::Value::Null)
    }

    /// Import previously exported preferences, re-validating them.
    pub async fn import(
        &self,
        user_id: &str,
        value: serde_json::Value,
    ) -> Result<NotificationPreferences, ValidationError> {
        let mut prefs: NotificationPreferences = serde_json::from_value(value)
            .map_err(|err| ValidationError::MalformedRecord(err.to_string()))?;
        prefs.user_id = user_id.to_string();
        prefs.validate()?;
        prefs.apply_adjustments();

        self.prefs
            .write()
            .await
            .insert(user_id.to_string(), prefs.clone());
        self.persist(&prefs).await;
        Ok(prefs)
    }

    async fn persist(&self, prefs: &NotificationPreferences) {
        let Some(store) = &self.store else { return };
        match serde_json::to_value(prefs) {
            Ok(value) => {
                if let Err(err) = store.put(&Self::storage_key(&prefs.user_id), value).await {
                    warn!("Failed to persist preferences for {}: {err}", prefs.user_id);
                }
            }
            Err(err) => warn!("Failed to encode preferences for {}: {err}", prefs.user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_lazy_defaults() {
        let store = PreferencesStore::new();
        let prefs = store.get("alice").await;
        assert_eq!(prefs.user_id, "alice");
        assert!(prefs.channels[&ChannelKind::InApp].enabled);
        assert_eq!(prefs.escalation.max_escalation_level, 3);
        assert!(prefs.validate().is_ok());
    }

    #[tokio::test]
    async fn test_update_replaces_section() {
        let store = PreferencesStore::new();
        let update = PreferencesUpdate {
            snooze: Some(SnoozePreferences {
                default_duration_minutes: 15,
                max_duration_minutes: 60,
                allowed_severities: [AlertSeverity::Low].into_iter().collect(),
            }),
            ..Default::default()
        };

        let prefs = store.update("alice", update).await.unwrap();
        assert_eq!(prefs.snooze.max_duration_minutes, 60);
        // Other sections untouched.
        assert!(prefs.escalation.enabled);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_quiet_hours() {
        let store = PreferencesStore::new();

        let bad_time = PreferencesUpdate {
            quiet_hours: Some(Some(QuietHours {
                start: "25:00".into(),
                end: "07:00".into(),
                timezone: "UTC".into(),
                allow_urgent: true,
            })),
            ..Default::default()
        };
        assert_eq!(
            store.update("alice", bad_time).await.unwrap_err(),
            ValidationError::InvalidTime("25:00".to_string())
        );

        let bad_tz = PreferencesUpdate {
            quiet_hours: Some(Some(QuietHours {
                start: "22:00".into(),
                end: "07:00".into(),
                timezone: "Mars/Olympus_Mons".into(),
                allow_urgent: true,
            })),
            ..Default::default()
        };
        assert!(matches!(
            store.update("alice", bad_tz).await.unwrap_err(),
            ValidationError::UnknownTimezone(_)
        ));
    }

    #[tokio::test]
    async fn test_validation_rejects_zero_escalation_levels() {
        let store = PreferencesStore::new();
        let update = PreferencesUpdate {
            escalation: Some(EscalationPreferences {
                max_escalation_level: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            store.update("alice", update).await.unwrap_err(),
            ValidationError::NoEscalationLevels
        );
    }

    #[tokio::test]
    async fn test_validation_rejects_duplicate_frequency_tier() {
        let store = PreferencesStore::new();
        let update = PreferencesUpdate {
            frequency_tiers: Some(FrequencyTiers {
                immediate: vec![AlertCategory::System],
                batched: vec![AlertCategory::System],
                digest: vec![],
            }),
            ..Default::default()
        };
        assert_eq!(
            store.update("alice", update).await.unwrap_err(),
            ValidationError::DuplicateFrequencyTier("system".to_string())
        );
    }

    #[tokio::test]
    async fn test_security_force_enabled() {
        let store = PreferencesStore::new();
        let mut categories = BTreeMap::new();
        categories.insert(
            AlertCategory::Security,
            CategoryPreference {
                enabled: false,
                channels: BTreeSet::new(),
                min_priority: NotificationPriority::Urgent,
            },
        );

        let prefs = store
            .update(
                "alice",
                PreferencesUpdate {
                    categories: Some(categories),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let security = &prefs.categories[&AlertCategory::Security];
        assert!(security.enabled);
        assert!(security.min_priority <= NotificationPriority::High);
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let store = PreferencesStore::new();
        store
            .update(
                "alice",
                PreferencesUpdate {
                    quiet_hours: Some(Some(QuietHours {
                        start: "22:00".into(),
                        end: "07:00".into(),
                        timezone: "Europe/Berlin".into(),
                        allow_urgent: true,
                    })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let exported = store.export("alice").await;
        let other = PreferencesStore::new();
        let imported = other.import("alice", exported).await.unwrap();
        assert_eq!(imported, store.get("alice").await);
    }

    #[tokio::test]
    async fn test_quiet_hours_wraparound() {
        let quiet = QuietHours {
            start: "22:00".into(),
            end: "07:00".into(),
            timezone: "UTC".into(),
            allow_urgent: false,
        };

        let at = |h: u32| Utc.with_ymd_and_hms(2026, 3, 10, h, 0, 0).unwrap();
        assert!(quiet.contains(at(23)));
        assert!(quiet.contains(at(3)));
        assert!(!quiet.contains(at(12)));
        assert!(!quiet.contains(at(7)));

        // Non-wrapping window.
        let daytime = QuietHours {
            start: "09:00".into(),
            end: "17:00".into(),
            timezone: "UTC".into(),
            allow_urgent: false,
        };
        assert!(daytime.contains(at(12)));
        assert!(!daytime.contains(at(20)));
    }
}

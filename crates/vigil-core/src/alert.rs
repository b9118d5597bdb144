//! Alert data model and lifecycle state machine.
//!
//! An [`Alert`] is an operational event with a severity, a lifecycle status,
//! and a delivery history. Status only moves along the edges encoded in
//! [`AlertStatus::can_transition`]; all mutation goes through the engine's
//! command surface.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notification::NotificationPriority;
use crate::traits::ChannelKind;

/// Alert severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Numeric rank used for threshold comparisons (low = 0 .. critical = 3).
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// The surfacing priority this severity maps to.
    pub fn priority(self) -> NotificationPriority {
        match self {
            Self::Low => NotificationPriority::Low,
            Self::Medium => NotificationPriority::Medium,
            Self::High => NotificationPriority::High,
            Self::Critical => NotificationPriority::Urgent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// All severities, least severe first.
    pub fn all() -> [AlertSeverity; 4] {
        [Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Snoozed,
    Escalated,
}

impl AlertStatus {
    /// Whether the status transition `self -> to` is a legal lifecycle edge.
    ///
    /// `Escalated` behaves as `Active` for commands (it can escalate
    /// further, be acknowledged, resolved, or snoozed). `Resolved` is
    /// terminal except for the retention-window purge.
    pub fn can_transition(self, to: AlertStatus) -> bool {
        use AlertStatus::*;
        match (self, to) {
            (Active, Acknowledged | Resolved | Snoozed | Escalated) => true,
            (Escalated, Acknowledged | Resolved | Snoozed | Escalated) => true,
            (Acknowledged, Resolved) => true,
            (Snoozed, Active | Resolved) => true,
            _ => false,
        }
    }

    /// Whether the alert still counts as live for delivery and escalation.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::Escalated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Snoozed => "snoozed",
            Self::Escalated => "escalated",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert category. Each category has a fixed metadata schema; see
/// [`AlertMetadata`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    System,
    Security,
    Performance,
    Deployment,
    Maintenance,
}

impl AlertCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Deployment => "deployment",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn all() -> [AlertCategory; 5] {
        [
            Self::System,
            Self::Security,
            Self::Performance,
            Self::Deployment,
            Self::Maintenance,
        ]
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed per-category metadata. One variant per [`AlertCategory`], so an
/// alert's category is derived from its metadata and a mismatch is
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertMetadata {
    System {
        hostname: String,
        service: String,
        check: Option<String>,
    },
    Security {
        rule: String,
        source_ip: Option<String>,
        principal: Option<String>,
    },
    Performance {
        metric: String,
        value: f64,
        threshold: f64,
    },
    Deployment {
        environment: String,
        version: String,
        initiated_by: Option<String>,
    },
    Maintenance {
        component: String,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    },
}

impl AlertMetadata {
    /// The category this metadata variant belongs to.
    pub fn category(&self) -> AlertCategory {
        match self {
            Self::System { .. } => AlertCategory::System,
            Self::Security { .. } => AlertCategory::Security,
            Self::Performance { .. } => AlertCategory::Performance,
            Self::Deployment { .. } => AlertCategory::Deployment,
            Self::Maintenance { .. } => AlertCategory::Maintenance,
        }
    }
}

/// One delivery attempt for an alert through a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub channel: ChannelKind,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl DeliveryAttempt {
    pub fn success(channel: ChannelKind, user_id: impl Into<String>, retry_count: u32) -> Self {
        Self {
            channel,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            success: true,
            error: None,
            retry_count,
        }
    }

    pub fn failure(
        channel: ChannelKind,
        user_id: impl Into<String>,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            channel,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
            retry_count,
        }
    }
}

/// Input for creating a new alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub source: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub metadata: AlertMetadata,
}

impl AlertDraft {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
        metadata: AlertMetadata,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            source: String::new(),
            tags: BTreeSet::new(),
            metadata,
        }
    }

    /// Set the originating source (monitor name, pipeline, etc.).
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// The category implied by the metadata variant.
    pub fn category(&self) -> AlertCategory {
        self.metadata.category()
    }
}

/// An operational alert with lifecycle state and delivery history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub escalation_level: u32,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub delivery_attempts: Vec<DeliveryAttempt>,
    pub tags: BTreeSet<String>,
    pub metadata: AlertMetadata,
}

impl Alert {
    /// Create a new active alert from a draft with a fresh id.
    pub fn from_draft(draft: AlertDraft) -> Self {
        let category = draft.category();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: draft.title,
            message: draft.message,
            severity: draft.severity,
            category,
            source: draft.source,
            created_at: Utc::now(),
            status: AlertStatus::Active,
            escalation_level: 0,
            snoozed_until: None,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            delivery_attempts: Vec::new(),
            tags: draft.tags,
            metadata: draft.metadata,
        }
    }

    /// The surfacing priority of this alert.
    pub fn priority(&self) -> NotificationPriority {
        self.severity.priority()
    }
}

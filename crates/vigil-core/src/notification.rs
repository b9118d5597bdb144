//! Notification surfacing model.
//!
//! A [`Notification`] is the per-user surfacing of an alert (or any other
//! engine-produced notice). Notifications are what the relevance filter
//! scores and the grouping manager clusters; the underlying [`crate::Alert`]
//! keeps its own lifecycle independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertCategory;

/// Surfacing priority, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn all() -> [NotificationPriority; 4] {
        [Self::Low, Self::Medium, Self::High, Self::Urgent]
    }
}

/// Per-user notification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
    Dismissed,
    Snoozed,
}

/// A per-user notification derived from an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub category: AlertCategory,
    /// Free-form type within the category ("disk_usage", "login_anomaly").
    /// Dismissal patterns are keyed by (user, category, kind).
    pub kind: String,
    pub priority: NotificationPriority,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        category: AlertCategory,
        kind: impl Into<String>,
        priority: NotificationPriority,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            category,
            kind: kind.into(),
            priority,
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
        }
    }
}

/// A cluster of notifications sharing a category and time bucket.
///
/// The group's priority is the maximum of its members' priorities; member
/// ids keep arrival order. A group is removed once all members have been
/// dismissed or resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationGroup {
    /// Group key: `<category>:<bucket>` where bucket is the floor of the
    /// creation time over the grouping window.
    pub id: String,
    pub category: AlertCategory,
    pub priority: NotificationPriority,
    pub collapsed: bool,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationGroup {
    pub fn new(id: impl Into<String>, category: AlertCategory) -> Self {
        Self {
            id: id.into(),
            category,
            priority: NotificationPriority::Low,
            collapsed: false,
            members: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a member, raising the group priority if needed.
    pub fn push(&mut self, notification_id: impl Into<String>, priority: NotificationPriority) {
        self.members.push(notification_id.into());
        if priority > self.priority {
            self.priority = priority;
        }
    }

    /// Remove a member by id. Returns true if it was present.
    pub fn remove(&mut self, notification_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != notification_id);
        self.members.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

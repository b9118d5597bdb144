//! Notification grouping and batch operations.
//!
//! Notifications sharing a category and time bucket join the same
//! [`NotificationGroup`]; the bucket width comes from the user's grouping
//! preferences. Batch operations apply to every member individually and
//! aggregate per-item outcomes; no item failure aborts the batch.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use vigil_core::{Notification, NotificationGroup, NotificationStatus, ValidationError};

use crate::preferences::PreferencesStore;

/// Operation applied to every member of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    MarkRead,
    Dismiss,
    Snooze,
}

/// Outcome for one member of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub notification_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Aggregated outcome of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItemResult>,
}

/// A notification together with the group it was bucketed into. The group
/// id is fixed at add time; later changes to the user's grouping window
/// must not orphan the membership.
struct GroupedNotification {
    notification: Notification,
    group_id: String,
}

/// Clusters notifications into category/time buckets.
pub struct GroupingManager {
    preferences: Arc<PreferencesStore>,
    groups: RwLock<IndexMap<String, NotificationGroup>>,
    notifications: RwLock<HashMap<String, GroupedNotification>>,
}

impl GroupingManager {
    pub fn new(preferences: Arc<PreferencesStore>) -> Self {
        Self {
            preferences,
            groups: RwLock::new(IndexMap::new()),
            notifications: RwLock::new(HashMap::new()),
        }
    }

    /// The group key for a notification: category plus the floor of its
    /// creation time over the user's grouping window.
    pub async fn group_key(&self, notification: &Notification) -> String {
        let prefs = self.preferences.get(&notification.user_id).await;
        let window_secs = i64::from(prefs.grouping.window_minutes.max(1)) * 60;
        let bucket = notification.created_at.timestamp().div_euclid(window_secs);
        format!("{}:{}", notification.category.as_str(), bucket)
    }

    /// Add a notification, creating its bucket group if needed. Returns
    /// the group id.
    pub async fn add(&self, notification: Notification) -> String {
        let key = self.group_key(&notification).await;

        {
            let mut groups = self.groups.write().await;
            let group = groups
                .entry(key.clone())
                .or_insert_with(|| NotificationGroup::new(key.clone(), notification.category));
            group.push(notification.id.clone(), notification.priority);
        }

        debug!(id = %notification.id, group = %key, "Grouped notification");
        self.notifications.write().await.insert(
            notification.id.clone(),
            GroupedNotification {
                notification,
                group_id: key.clone(),
            },
        );
        key
    }

    /// Snapshot of one group.
    pub async fn group(&self, group_id: &str) -> Option<NotificationGroup> {
        self.groups.read().await.get(group_id).cloned()
    }

    /// Snapshot of all groups in creation order.
    pub async fn groups(&self) -> Vec<NotificationGroup> {
        self.groups.read().await.values().cloned().collect()
    }

    /// Snapshot of one notification.
    pub async fn notification(&self, id: &str) -> Option<Notification> {
        self.notifications
            .read()
            .await
            .get(id)
            .map(|entry| entry.notification.clone())
    }

    /// Remove a notification from its group (alert resolved elsewhere).
    /// Empty groups are deleted. Uses the group id recorded at add time,
    /// so the removal still finds the group after the user's grouping
    /// window changed.
    pub async fn remove_notification(&self, notification_id: &str) {
        let removed = self.notifications.write().await.remove(notification_id);
        if let Some(entry) = removed {
            let mut groups = self.groups.write().await;
            if let Some(group) = groups.get_mut(&entry.group_id) {
                group.remove(notification_id);
                if group.is_empty() {
                    groups.shift_remove(&entry.group_id);
                }
            }
        }
    }

    /// Apply `op` to every member of `group_id` on behalf of `user_id`.
    ///
    /// Each member's outcome is independent; the batch never aborts. A
    /// group left with no members after a dismiss is deleted.
    pub async fn perform_batch_operation(
        &self,
        op: BatchOperation,
        group_id: &str,
        user_id: &str,
    ) -> Result<BatchResult, ValidationError> {
        let members = {
            let groups = self.groups.read().await;
            let group = groups
                .get(group_id)
                .ok_or_else(|| ValidationError::UnknownGroup(group_id.to_string()))?;
            group.members.clone()
        };

        let mut items = Vec::with_capacity(members.len());
        let mut dismissed = Vec::new();

        for member in members {
            let result = self.apply_member_op(op, &member, user_id).await;
            if result.success && op == BatchOperation::Dismiss {
                dismissed.push(member.clone());
            }
            items.push(result);
        }

        if !dismissed.is_empty() {
            let mut groups = self.groups.write().await;
            if let Some(group) = groups.get_mut(group_id) {
                for id in &dismissed {
                    group.remove(id);
                }
                if group.is_empty() {
                    groups.shift_remove(group_id);
                    debug!(group = %group_id, "Deleted empty group after dismiss");
                }
            }
        }

        let succeeded = items.iter().filter(|i| i.success).count();
        let failed = items.len() - succeeded;
        Ok(BatchResult {
            succeeded,
            failed,
            items,
        })
    }

    async fn apply_member_op(
        &self,
        op: BatchOperation,
        notification_id: &str,
        user_id: &str,
    ) -> BatchItemResult {
        let mut notifications = self.notifications.write().await;
        let Some(entry) = notifications.get_mut(notification_id) else {
            return BatchItemResult {
                notification_id: notification_id.to_string(),
                success: false,
                error: Some("unknown notification".to_string()),
            };
        };
        let notification = &mut entry.notification;

        if notification.user_id != user_id {
            return BatchItemResult {
                notification_id: notification_id.to_string(),
                success: false,
                error: Some("not visible to user".to_string()),
            };
        }

        notification.status = match op {
            BatchOperation::MarkRead => NotificationStatus::Read,
            BatchOperation::Dismiss => NotificationStatus::Dismissed,
            BatchOperation::Snooze => NotificationStatus::Snoozed,
        };

        BatchItemResult {
            notification_id: notification_id.to_string(),
            success: true,
            error: None,
        }
    }
}

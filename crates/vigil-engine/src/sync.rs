//! Cross-device preference synchronization.
//!
//! Devices exchange [`PreferenceRecord`]s; when a local and a server record
//! for the same user diverge, [`resolve`] applies the configured
//! [`ConflictStrategy`]. Merge keeps the newer record and fills in map
//! entries only the older one has; Manual refuses to pick and surfaces the
//! conflict to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vigil_core::ConflictError;

use crate::preferences::NotificationPreferences;

/// How conflicting preference records are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The local record wins.
    Local,
    /// The server record wins.
    Server,
    /// Newer record wins section-by-section; the older record fills in
    /// channel and category entries the newer one lacks.
    Merge,
    /// Surface the conflict instead of resolving it.
    Manual,
}

/// A versioned preference snapshot as exchanged between devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub user_id: String,
    pub preferences: NotificationPreferences,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

impl PreferenceRecord {
    pub fn new(preferences: NotificationPreferences, revision: u64) -> Self {
        Self {
            user_id: preferences.user_id.clone(),
            updated_at: preferences.updated_at,
            preferences,
            revision,
        }
    }
}

/// The two sides of an unresolved conflict, for manual resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceConflict {
    pub local: PreferenceRecord,
    pub server: PreferenceRecord,
}

/// Outcome of conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictOutcome {
    Resolved(PreferenceRecord),
    Unresolved(PreferenceConflict),
}

impl ConflictOutcome {
    /// Unwrap the resolved record, turning an unresolved conflict into a
    /// [`ConflictError::Manual`] for callers that cannot prompt a user.
    pub fn into_record(self) -> Result<PreferenceRecord, ConflictError> {
        match self {
            Self::Resolved(record) => Ok(record),
            Self::Unresolved(conflict) => Err(ConflictError::Manual {
                user_id: conflict.local.user_id,
            }),
        }
    }
}

/// Reconcile a diverged local/server pair under `strategy`.
///
/// The resolved record's revision is one past the larger input revision so
/// both sides converge on it.
pub fn resolve(
    strategy: ConflictStrategy,
    local: PreferenceRecord,
    server: PreferenceRecord,
) -> ConflictOutcome {
    let next_revision = local.revision.max(server.revision) + 1;
    debug!(
        user = %local.user_id,
        ?strategy,
        local_rev = local.revision,
        server_rev = server.revision,
        "Resolving preference conflict"
    );

    let mut resolved = match strategy {
        ConflictStrategy::Local => local,
        ConflictStrategy::Server => server,
        ConflictStrategy::Merge => merge(local, server),
        ConflictStrategy::Manual => {
            return ConflictOutcome::Unresolved(PreferenceConflict { local, server });
        }
    };

    resolved.revision = next_revision;
    ConflictOutcome::Resolved(resolved)
}

/// Newer record wins wholesale, then channel and category entries present
/// only in the older record are carried over. Scalar sections are not
/// blended; half of one snooze policy and half of another is worse than
/// either.
fn merge(local: PreferenceRecord, server: PreferenceRecord) -> PreferenceRecord {
    let (newer, older) = if local.updated_at >= server.updated_at {
        (local, server)
    } else {
        (server, local)
    };

    let mut merged = newer;
    for (kind, pref) in older.preferences.channels {
        merged.preferences.channels.entry(kind).or_insert(pref);
    }
    for (category, pref) in older.preferences.categories {
        merged.preferences.categories.entry(category).or_insert(pref);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vigil_core::{AlertSeverity, ChannelKind};

    use crate::preferences::ChannelPreference;

    fn record(revision: u64, age: Duration) -> PreferenceRecord {
        let mut prefs = NotificationPreferences::default_for("alice");
        prefs.updated_at = Utc::now() - age;
        PreferenceRecord::new(prefs, revision)
    }

    #[test]
    fn test_local_and_server_strategies() {
        let mut local = record(3, Duration::zero());
        local.preferences.snooze.default_duration_minutes = 15;
        let server = record(5, Duration::minutes(10));

        let ConflictOutcome::Resolved(resolved) =
            resolve(ConflictStrategy::Local, local.clone(), server.clone())
        else {
            panic!("expected resolution");
        };
        assert_eq!(resolved.preferences.snooze.default_duration_minutes, 15);
        assert_eq!(resolved.revision, 6);

        let ConflictOutcome::Resolved(resolved) = resolve(ConflictStrategy::Server, local, server)
        else {
            panic!("expected resolution");
        };
        assert_eq!(resolved.preferences.snooze.default_duration_minutes, 30);
        assert_eq!(resolved.revision, 6);
    }

    #[test]
    fn test_merge_newer_wins_older_fills_gaps() {
        // Local is newer and disables push; server still has a webhook
        // entry local lost.
        let mut local = record(2, Duration::zero());
        local
            .preferences
            .channels
            .get_mut(&ChannelKind::Push)
            .unwrap()
            .enabled = false;
        local.preferences.channels.remove(&ChannelKind::Webhook);

        let mut server = record(2, Duration::minutes(5));
        server.preferences.channels.insert(
            ChannelKind::Webhook,
            ChannelPreference::immediate(true, AlertSeverity::High),
        );

        let ConflictOutcome::Resolved(resolved) = resolve(ConflictStrategy::Merge, local, server)
        else {
            panic!("expected resolution");
        };

        // Newer side's edit survives.
        assert!(!resolved.preferences.channels[&ChannelKind::Push].enabled);
        // Older side's extra entry is carried over.
        assert!(resolved.preferences.channels[&ChannelKind::Webhook].enabled);
        assert_eq!(resolved.revision, 3);
    }

    #[test]
    fn test_manual_surfaces_conflict() {
        let local = record(1, Duration::zero());
        let server = record(2, Duration::minutes(1));

        let outcome = resolve(ConflictStrategy::Manual, local.clone(), server.clone());
        let ConflictOutcome::Unresolved(conflict) = outcome.clone() else {
            panic!("expected unresolved conflict");
        };
        assert_eq!(conflict.local, local);
        assert_eq!(conflict.server, server);

        let err = outcome.into_record().unwrap_err();
        assert_eq!(
            err,
            ConflictError::Manual {
                user_id: "alice".to_string()
            }
        );
    }
}

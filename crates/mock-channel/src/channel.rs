//! Recording channel adapter and static collaborator answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use vigil_core::{
    Alert, AvailabilityProvider, ChannelAdapter, ChannelKind, DeliveryError, RecipientResolver,
    UserAvailability,
};

/// One send observed by a [`MockChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub alert_id: String,
    pub user_id: String,
    pub channel: ChannelKind,
}

/// A channel adapter that records every send and can be scripted to fail
/// the next N sends before succeeding.
pub struct MockChannel {
    kind: ChannelKind,
    fail_remaining: AtomicUsize,
    sends: Mutex<Vec<RecordedSend>>,
}

impl MockChannel {
    /// An adapter that always succeeds.
    pub fn new(kind: ChannelKind) -> Self {
        Self::failing(kind, 0)
    }

    /// An adapter whose first `failures` sends return an error.
    pub fn failing(kind: ChannelKind, failures: usize) -> Self {
        Self {
            kind,
            fail_remaining: AtomicUsize::new(failures),
            sends: Mutex::new(Vec::new()),
        }
    }

    /// All successful sends, in order.
    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().expect("mock lock poisoned").clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().expect("mock lock poisoned").len()
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, alert: &Alert, user_id: &str) -> Result<(), DeliveryError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError::ChannelFailed {
                channel: self.kind.as_str().to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        self.sends.lock().expect("mock lock poisoned").push(RecordedSend {
            alert_id: alert.id.clone(),
            user_id: user_id.to_string(),
            channel: self.kind,
        });
        Ok(())
    }
}

/// Resolves every alert to the same fixed recipient list.
pub struct StaticRecipients(Vec<String>);

impl StaticRecipients {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(users.into_iter().map(Into::into).collect())
    }

    pub fn single(user: impl Into<String>) -> Self {
        Self(vec![user.into()])
    }
}

#[async_trait]
impl RecipientResolver for StaticRecipients {
    async fn recipients(&self, _alert: &Alert) -> Vec<String> {
        self.0.clone()
    }
}

/// Per-user availability answers with a default for unknown users.
pub struct StaticAvailability {
    default: UserAvailability,
    by_user: Mutex<HashMap<String, UserAvailability>>,
}

impl StaticAvailability {
    /// Everyone available unless overridden.
    pub fn all_available() -> Self {
        Self::with_default(UserAvailability::available())
    }

    pub fn with_default(default: UserAvailability) -> Self {
        Self {
            default,
            by_user: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, user_id: impl Into<String>, availability: UserAvailability) {
        self.by_user
            .lock()
            .expect("mock lock poisoned")
            .insert(user_id.into(), availability);
    }
}

#[async_trait]
impl AvailabilityProvider for StaticAvailability {
    async fn availability(&self, user_id: &str) -> UserAvailability {
        self.by_user
            .lock()
            .expect("mock lock poisoned")
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

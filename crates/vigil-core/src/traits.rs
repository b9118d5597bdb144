//! Collaborator traits the host application provides.
//!
//! The engine never talks to a transport, a directory, or a database
//! directly. Channel adapters, recipient resolution, user availability, and
//! durable storage are all injected behind these seams.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::error::{DeliveryError, StoreError};

/// A delivery medium.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    InApp,
    Email,
    Sms,
    Push,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::Webhook => "webhook",
        }
    }

    pub fn all() -> [ChannelKind; 5] {
        [Self::InApp, Self::Email, Self::Sms, Self::Push, Self::Webhook]
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter for one delivery channel.
///
/// Delivery is at-least-once up to the retry cap; adapters must be
/// idempotent or tolerate duplicates.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Which channel this adapter serves.
    fn kind(&self) -> ChannelKind;

    /// Deliver one alert to one user.
    async fn send(&self, alert: &Alert, user_id: &str) -> Result<(), DeliveryError>;
}

/// Resolves which users should receive a given alert.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn recipients(&self, alert: &Alert) -> Vec<String>;
}

/// Current presence state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Busy,
    Away,
    DoNotDisturb,
}

/// Availability snapshot for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAvailability {
    pub status: AvailabilityStatus,
    pub last_activity: Option<DateTime<Utc>>,
    pub timezone: String,
}

impl UserAvailability {
    pub fn new(status: AvailabilityStatus) -> Self {
        Self {
            status,
            last_activity: None,
            timezone: "UTC".to_string(),
        }
    }

    pub fn available() -> Self {
        Self::new(AvailabilityStatus::Available)
    }
}

impl Default for UserAvailability {
    fn default() -> Self {
        Self::available()
    }
}

/// Availability provider, typically backed by presence infrastructure.
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    async fn availability(&self, user_id: &str) -> UserAvailability;
}

/// Durable key-value storage for preferences, dismissal patterns, and
/// analytics batches. Records are JSON values; the engine never assumes
/// anything about the backing technology.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

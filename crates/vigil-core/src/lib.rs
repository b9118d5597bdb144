//! Core types and collaborator traits for the Vigil alert engine.
//!
//! This crate provides the shared interface between the engine and its host
//! application. It defines:
//!
//! - [`Alert`] and its lifecycle types ([`AlertStatus`], [`AlertSeverity`],
//!   [`AlertMetadata`]) - the alert data model
//! - [`Notification`] / [`NotificationGroup`] - the surfacing-side model
//! - [`ChannelAdapter`] / [`RecipientResolver`] / [`AvailabilityProvider`] /
//!   [`KeyValueStore`] - collaborator seams the host must implement
//! - [`Scheduler`] - the abstract timer seam (real timers in production,
//!   a virtual clock in tests)
//! - Error types for each failure class
//!
//! # Example
//!
//! ```rust
//! use vigil_core::{AlertDraft, AlertMetadata, AlertSeverity};
//!
//! let draft = AlertDraft::new(
//!     "Disk almost full",
//!     "/var is at 94% on db-3",
//!     AlertSeverity::High,
//!     AlertMetadata::System {
//!         hostname: "db-3".into(),
//!         service: "postgres".into(),
//!         check: Some("disk_usage".into()),
//!     },
//! );
//! assert_eq!(draft.category().as_str(), "system");
//! ```

mod alert;
mod error;
mod notification;
mod scheduler;
mod traits;

pub use alert::{
    Alert, AlertCategory, AlertDraft, AlertMetadata, AlertSeverity, AlertStatus, DeliveryAttempt,
};
pub use error::{ConflictError, DeliveryError, SchedulingError, StoreError, ValidationError};
pub use notification::{
    Notification, NotificationGroup, NotificationPriority, NotificationStatus,
};
pub use scheduler::{Scheduler, TimerHandle, TimerTask, TokioScheduler};
pub use traits::{
    AvailabilityProvider, AvailabilityStatus, ChannelAdapter, ChannelKind, KeyValueStore,
    RecipientResolver, UserAvailability,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

//! Alert and notification delivery engine.
//!
//! `vigil-engine` takes alerts from creation through delivery, escalation,
//! and resolution. The host application injects its transports and presence
//! infrastructure through the seams in `vigil-core`; the engine owns the
//! policy:
//!
//! - [`AlertEngine`] - lifecycle state machine and command surface
//! - [`DeliveryDispatcher`] - queued, batched, retried channel fan-out
//! - [`EscalationScheduler`] - timed escalation with an availability policy
//! - [`RelevanceFilter`] - learned scoring of what is worth surfacing
//! - [`GroupingManager`] - category/time-bucket notification clusters
//! - [`PreferencesStore`] - validated per-user preferences
//! - [`AnalyticsRecorder`] - buffered interaction analytics and dismissal
//!   patterns
//! - [`sync`] - cross-device preference conflict resolution
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil_core::{AlertDraft, AlertMetadata, AlertSeverity};
//! use vigil_engine::AlertEngine;
//! # use vigil_core::{async_trait, Alert, AvailabilityProvider, RecipientResolver,
//! #     UserAvailability};
//! # struct OnCall;
//! # #[async_trait]
//! # impl RecipientResolver for OnCall {
//! #     async fn recipients(&self, _alert: &Alert) -> Vec<String> {
//! #         vec!["alice".to_string()]
//! #     }
//! # }
//! # struct Presence;
//! # #[async_trait]
//! # impl AvailabilityProvider for Presence {
//! #     async fn availability(&self, _user_id: &str) -> UserAvailability {
//! #         UserAvailability::available()
//! #     }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = AlertEngine::builder(Arc::new(OnCall), Arc::new(Presence)).build();
//! engine.start();
//!
//! let alert = engine
//!     .create_alert(AlertDraft::new(
//!         "Disk almost full",
//!         "/var is at 94% on db-3",
//!         AlertSeverity::High,
//!         AlertMetadata::System {
//!             hostname: "db-3".into(),
//!             service: "postgres".into(),
//!             check: Some("disk_usage".into()),
//!         },
//!     ))
//!     .await;
//! engine.acknowledge_alert(&alert.id, "alice").await;
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod dispatch;
pub mod escalation;
pub mod grouping;
pub mod preferences;
pub mod relevance;
pub mod store;
pub mod sync;

pub use analytics::{AnalyticsRecorder, DismissalPattern, InteractionAction, InteractionEvent};
pub use config::{AnalyticsConfig, DispatchConfig, EngineConfig, RelevanceConfig};
pub use dispatch::{DeliveryDispatcher, DeliveryStats};
pub use escalation::{EscalationDecision, EscalationScheduler};
pub use grouping::{BatchOperation, BatchResult, GroupingManager};
pub use preferences::{
    NotificationPreferences, PreferencesStore, PreferencesUpdate, QuietHours,
};
pub use relevance::RelevanceFilter;
pub use store::{AlertEngine, AlertEngineBuilder, AlertStats, SubscriptionId};
pub use sync::{ConflictOutcome, ConflictStrategy, PreferenceRecord};

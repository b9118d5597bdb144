//! Error types for engine operations.
//!
//! Each failure class from the engine's contract gets its own enum:
//! validation failures are returned synchronously to the caller, delivery
//! failures are retried and then absorbed into statistics, scheduling
//! failures are logged without advancing alert state, and sync conflicts
//! are surfaced to an external resolver.

use thiserror::Error;

/// Synchronous validation failure. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Time string is not HH:mm.
    #[error("invalid time '{0}', expected HH:mm")]
    InvalidTime(String),

    /// Timezone is not a known IANA identifier.
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    /// Snooze requested for a severity the user's preferences exclude.
    #[error("snooze not allowed for severity '{0}'")]
    SnoozeNotAllowed(String),

    /// Snooze duration exceeds the configured maximum.
    #[error("snooze duration {requested} min exceeds maximum {max} min")]
    SnoozeTooLong { requested: u32, max: u32 },

    /// Escalation enabled with no levels to escalate through.
    #[error("max escalation level must be at least 1")]
    NoEscalationLevels,

    /// A category may belong to at most one frequency tier.
    #[error("category '{0}' listed in more than one frequency tier")]
    DuplicateFrequencyTier(String),

    /// Default snooze duration cannot exceed the maximum.
    #[error("default snooze duration {default} min exceeds maximum {max} min")]
    SnoozeDefaultOverMax { default: u32, max: u32 },

    /// Batch operation targeted a group that does not exist.
    #[error("unknown notification group '{0}'")]
    UnknownGroup(String),

    /// A required field was empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Imported preference record could not be decoded.
    #[error("malformed preference record: {0}")]
    MalformedRecord(String),
}

/// Channel adapter failure. Retried locally up to the retry cap, then
/// recorded as a terminal failed attempt; never propagated to the caller
/// of `create_alert`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The adapter reported a send failure.
    #[error("channel '{channel}' rejected send: {reason}")]
    ChannelFailed { channel: String, reason: String },

    /// No adapter is registered for the channel.
    #[error("no adapter registered for channel '{0}'")]
    NoAdapter(String),
}

/// Timer infrastructure failure. Logged; alert state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("timer infrastructure failure: {0}")]
    Timer(String),
}

/// Durable key-value store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record failed to encode or decode.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Offline preference-record sync conflict that requires manual resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("unresolved preference conflict for user '{user_id}'")]
    Manual { user_id: String },
}

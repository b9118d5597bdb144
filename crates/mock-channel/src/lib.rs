//! Test collaborators for the Vigil alert engine.
//!
//! This crate provides controllable implementations of every collaborator
//! seam in `vigil-core`:
//!
//! - [`MockChannel`] - records every send and can be scripted to fail
//! - [`ManualScheduler`] - a virtual clock; `advance` runs due timers
//!   deterministically without real waiting
//! - [`MemoryStore`] - an in-memory key-value store with a fail-next-puts
//!   switch for exercising flush re-queueing
//! - [`StaticRecipients`] / [`StaticAvailability`] - fixed answers
//!
//! Host applications can also use these in their own test suites.

mod channel;
mod scheduler;
mod store;

pub use channel::{MockChannel, RecordedSend, StaticAvailability, StaticRecipients};
pub use scheduler::ManualScheduler;
pub use store::MemoryStore;

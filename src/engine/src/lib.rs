//! Retention policy evaluation and batch enforcement.
//!
//! The engine resolves per-group retention policies, turns them into
//! eligibility queries against a host-owned store, and applies
//! disable/delete/archive transitions in bounded batches.
//!
//! Hosts plug in through the traits in [`store`] and call
//! [`retention::RetentionOrchestrator::run`] on their own schedule.

pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod retention;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use lifecycle::{LoginError, PurgeReport, RetentionStatus, SubjectLifecycle};
pub use memory::{MemoryStore, Snapshot};
pub use retention::{RetentionOrchestrator, RetentionRunResult, RunError};
pub use store::{ContentStore, SettingsProvider, SettingsStore, StoreError, SubjectStore};

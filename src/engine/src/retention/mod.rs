//! Retention enforcement.
//!
//! ## Architecture
//!
//! - `period`: retention periods and threshold computation
//! - `settings`: operator settings and save-time sanitization
//! - `policy`: per-group override resolution into disjoint partitions
//! - `query`: abstract eligibility predicates and keyset page requests
//! - `enforcer`: the fetch/filter/mutate/emit page cycle
//! - `orchestrator`: run entry point with fixed pass order and run lock
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use common::config::RetentionConfig;
//! use engine::memory::MemoryStore;
//! use engine::retention::{LoggingObserver, RetentionOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = RetentionOrchestrator::new(
//!     store.clone(),
//!     store.clone(),
//!     store,
//!     RetentionConfig::default(),
//! )
//! .with_observer(Arc::new(LoggingObserver));
//!
//! let result = orchestrator.run().await?;
//! println!("{} passes", result.passes.len());
//! # Ok(())
//! # }
//! ```

pub mod enforcer;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod period;
pub mod policy;
pub mod query;
pub mod settings;

// Re-export commonly used types
pub use enforcer::{BatchEnforcer, EnforcementAction, EnforcementError, PassResult, Tally};
pub use events::{
    EventTarget, LoggingObserver, ObserverSet, RetentionEvent, RetentionEventKind,
    RetentionObserver,
};
pub use lock::{LocalRunLock, LockToken, RUN_LOCK_KEY, RunLock};
pub use metrics::RetentionMetrics;
pub use orchestrator::{RetentionOrchestrator, RetentionRunResult, RunError};
pub use period::{PeriodUnit, RetentionPeriod};
pub use policy::{GroupConstraint, Partition, PolicyResolver, PolicySource, UserAction};
pub use query::{
    Condition, ContentFilter, EligibilityQueryBuilder, PageRequest, Predicate, SubjectAttr,
    SubjectQuery, SubjectQueryKind,
};
pub use settings::{
    RetentionSettings, RolePolicy, SETTINGS_KEY, SanitizedSettings, SettingsWarning,
    sanitize_settings,
};

//! Retention events and their observers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::model::{ContentId, ContentType, SubjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventTarget {
    Subject(SubjectId),
    Content(ContentId),
}

impl fmt::Display for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTarget::Subject(id) => write!(f, "subject:{id}"),
            EventTarget::Content(id) => write!(f, "content:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetentionEventKind {
    UserDisabled,
    UserDeleted,
    ContentArchived(ContentType),
}

/// Emitted once per applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionEvent {
    pub kind: RetentionEventKind,
    pub target: EventTarget,
    pub occurred_at: DateTime<Utc>,
}

impl RetentionEvent {
    pub fn user_disabled(id: SubjectId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: RetentionEventKind::UserDisabled,
            target: EventTarget::Subject(id),
            occurred_at,
        }
    }

    pub fn user_deleted(id: SubjectId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind: RetentionEventKind::UserDeleted,
            target: EventTarget::Subject(id),
            occurred_at,
        }
    }

    pub fn content_archived(
        id: ContentId,
        content_type: ContentType,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: RetentionEventKind::ContentArchived(content_type),
            target: EventTarget::Content(id),
            occurred_at,
        }
    }

    /// Stable event name for external subscribers.
    pub fn name(&self) -> &'static str {
        match self.kind {
            RetentionEventKind::UserDisabled => "user_disabled",
            RetentionEventKind::UserDeleted => "user_deleted",
            RetentionEventKind::ContentArchived(_) => "content_archived",
        }
    }
}

/// Receives retention events synchronously, right after each mutation.
///
/// Errors are logged and discarded; they never affect enforcement.
#[cfg_attr(test, mockall::automock)]
pub trait RetentionObserver: Send + Sync {
    fn on_event(&self, event: &RetentionEvent) -> anyhow::Result<()>;
}

/// Observer that logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl RetentionObserver for LoggingObserver {
    fn on_event(&self, event: &RetentionEvent) -> anyhow::Result<()> {
        tracing::info!(
            event = event.name(),
            record = %event.target,
            occurred_at = %event.occurred_at,
            "Retention event"
        );
        Ok(())
    }
}

/// Ordered list of observers owned by the orchestrator.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn RetentionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn RetentionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer. Returns the number that failed.
    pub fn emit(&self, event: &RetentionEvent) -> usize {
        let mut failures = 0;
        for observer in &self.observers {
            if let Err(e) = observer.on_event(event) {
                failures += 1;
                warn!(
                    event = event.name(),
                    record = %event.target,
                    error = %e,
                    "Retention observer failed"
                );
            }
        }
        failures
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

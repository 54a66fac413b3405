//! Eligibility queries handed to the host store.
//!
//! Filters are abstract predicate sets, not SQL. Hosts translate them to
//! whatever their store speaks; [`SubjectQuery::matches`] and
//! [`ContentFilter::matches`] define the reference semantics.
//!
//! Protected identities are never part of a store-level filter. The
//! enforcer removes them from each fetched page.

use chrono::{DateTime, Utc};

use super::policy::{GroupConstraint, Partition};
use crate::model::{ContentRecord, ContentStatus, ContentType, SubjectRecord};

/// Subject attributes a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectAttr {
    LastActiveAt,
    DisabledAt,
    RegisteredAt,
}

impl SubjectAttr {
    fn value(&self, record: &SubjectRecord) -> Option<DateTime<Utc>> {
        match self {
            SubjectAttr::LastActiveAt => record.last_active_at,
            SubjectAttr::DisabledAt => record.disabled_at,
            SubjectAttr::RegisteredAt => Some(record.registered_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The attribute is set.
    Present,
    /// The attribute is absent (or empty in stores that keep blank values).
    Absent,
    /// Set and not after the instant.
    AtOrBefore(DateTime<Utc>),
    /// Set and strictly before the instant.
    Before(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predicate {
    pub attr: SubjectAttr,
    pub condition: Condition,
}

impl Predicate {
    pub const fn new(attr: SubjectAttr, condition: Condition) -> Self {
        Self { attr, condition }
    }

    pub fn matches(&self, record: &SubjectRecord) -> bool {
        let value = self.attr.value(record);
        match self.condition {
            Condition::Present => value.is_some(),
            Condition::Absent => value.is_none(),
            Condition::AtOrBefore(instant) => value.is_some_and(|v| v <= instant),
            Condition::Before(instant) => value.is_some_and(|v| v < instant),
        }
    }
}

/// Which eligibility rule a subject query encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectQueryKind {
    /// Active once, inactive since the threshold, not yet disabled.
    InactiveSince,
    /// Never active, registered before the threshold, not yet disabled.
    NeverActive,
    /// Disabled at or before the threshold.
    DisabledSince,
}

impl SubjectQueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectQueryKind::InactiveSince => "inactive_since",
            SubjectQueryKind::NeverActive => "never_active",
            SubjectQueryKind::DisabledSince => "disabled_since",
        }
    }
}

/// Conjunction of predicates intersected with a group constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectQuery {
    pub kind: SubjectQueryKind,
    pub predicates: Vec<Predicate>,
    pub groups: GroupConstraint,
}

impl SubjectQuery {
    pub fn matches(&self, record: &SubjectRecord) -> bool {
        self.groups.admits(&record.groups) && self.predicates.iter().all(|p| p.matches(record))
    }
}

/// Published items of one type, published before the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFilter {
    pub content_type: ContentType,
    pub status: ContentStatus,
    pub published_before: DateTime<Utc>,
}

impl ContentFilter {
    pub fn matches(&self, record: &ContentRecord) -> bool {
        record.content_type == self.content_type
            && record.status == self.status
            && record.published_at < self.published_before
    }
}

/// Keyset page request: up to `limit` ids strictly greater than `after`,
/// ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<C> {
    pub after: Option<C>,
    pub limit: usize,
}

impl<C> PageRequest<C> {
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }

    pub fn next(after: C, limit: usize) -> Self {
        Self {
            after: Some(after),
            limit,
        }
    }
}

/// Builds the store queries for each eligibility partition.
pub struct EligibilityQueryBuilder;

impl EligibilityQueryBuilder {
    /// The two disable queries: ever-active subjects first, then subjects
    /// that never became active.
    pub fn disable_queries(partition: &Partition, threshold: DateTime<Utc>) -> [SubjectQuery; 2] {
        let not_disabled = Predicate::new(SubjectAttr::DisabledAt, Condition::Absent);

        [
            SubjectQuery {
                kind: SubjectQueryKind::InactiveSince,
                predicates: vec![
                    Predicate::new(SubjectAttr::LastActiveAt, Condition::Present),
                    Predicate::new(SubjectAttr::LastActiveAt, Condition::AtOrBefore(threshold)),
                    not_disabled,
                ],
                groups: partition.groups.clone(),
            },
            SubjectQuery {
                kind: SubjectQueryKind::NeverActive,
                predicates: vec![
                    Predicate::new(SubjectAttr::LastActiveAt, Condition::Absent),
                    Predicate::new(SubjectAttr::RegisteredAt, Condition::Before(threshold)),
                    not_disabled,
                ],
                groups: partition.groups.clone(),
            },
        ]
    }

    pub fn delete_query(partition: &Partition, threshold: DateTime<Utc>) -> SubjectQuery {
        SubjectQuery {
            kind: SubjectQueryKind::DisabledSince,
            predicates: vec![
                Predicate::new(SubjectAttr::DisabledAt, Condition::Present),
                Predicate::new(SubjectAttr::DisabledAt, Condition::AtOrBefore(threshold)),
            ],
            groups: partition.groups.clone(),
        }
    }

    pub fn archive_filter(content_type: ContentType, threshold: DateTime<Utc>) -> ContentFilter {
        ContentFilter {
            content_type,
            status: ContentStatus::Published,
            published_before: threshold,
        }
    }
}

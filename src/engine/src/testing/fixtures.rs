//! Record builders and a fixed clock.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeSet;

use crate::model::{ContentId, ContentRecord, ContentStatus, ContentType, SubjectId, SubjectRecord};

/// Fixed "now" shared by fixtures: 2025-06-15T12:00:00Z.
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_749_988_800, 0).unwrap_or_default()
}

/// `days` before [`fixed_now`].
pub fn days_ago(days: i64) -> DateTime<Utc> {
    fixed_now() - TimeDelta::days(days)
}

/// Builds a subject. Defaults: group `subscriber`, registered 1000 days
/// ago, never active, not disabled, not protected.
#[derive(Debug, Clone)]
pub struct SubjectBuilder {
    record: SubjectRecord,
}

impl SubjectBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            record: SubjectRecord {
                id: SubjectId(id),
                groups: BTreeSet::from(["subscriber".to_string()]),
                registered_at: days_ago(1000),
                last_active_at: None,
                disabled_at: None,
                protected: false,
            },
        }
    }

    /// Replace the group memberships.
    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.record.groups = groups.iter().map(|group| group.to_string()).collect();
        self
    }

    pub fn registered(mut self, at: DateTime<Utc>) -> Self {
        self.record.registered_at = at;
        self
    }

    pub fn last_active(mut self, at: DateTime<Utc>) -> Self {
        self.record.last_active_at = Some(at);
        self
    }

    pub fn disabled(mut self, at: DateTime<Utc>) -> Self {
        self.record.disabled_at = Some(at);
        self
    }

    pub fn protected(mut self) -> Self {
        self.record.protected = true;
        self
    }

    pub fn build(self) -> SubjectRecord {
        self.record
    }
}

/// Builds a published content item.
#[derive(Debug, Clone)]
pub struct ContentBuilder {
    record: ContentRecord,
}

impl ContentBuilder {
    pub fn post(id: u64) -> Self {
        Self::new(id, ContentType::Post)
    }

    pub fn page(id: u64) -> Self {
        Self::new(id, ContentType::Page)
    }

    fn new(id: u64, content_type: ContentType) -> Self {
        Self {
            record: ContentRecord {
                id: ContentId(id),
                content_type,
                status: ContentStatus::Published,
                published_at: days_ago(1),
                archived_at: None,
            },
        }
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.record.published_at = at;
        self
    }

    pub fn draft(mut self) -> Self {
        self.record.status = ContentStatus::Draft;
        self
    }

    pub fn build(self) -> ContentRecord {
        self.record
    }
}

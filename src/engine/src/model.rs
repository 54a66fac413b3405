//! Records the engine reads and writes through the host store.
//!
//! Timestamps the engine owns (`last_active_at`, `disabled_at`,
//! `archived_at`) are persisted as epoch seconds, or omitted when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Group (role) key, e.g. `administrator` or `editor`.
pub type GroupKey = String;

/// Opaque subject identifier. Pagination walks subjects in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque content identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Publishable content types with their own archive policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Page,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Post, ContentType::Page];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Page => "page",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Published,
    /// Terminal within the engine; nothing un-archives.
    Archived,
}

/// A user-like account tracked for activity-based retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: SubjectId,

    #[serde(default)]
    pub groups: BTreeSet<GroupKey>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub registered_at: DateTime<Utc>,

    /// Last login, or registration time when the subject never logged in.
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_active_at: Option<DateTime<Utc>>,

    /// Set by the disable pass, cleared on login or operator re-enable.
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub disabled_at: Option<DateTime<Utc>>,

    /// Administrator or super-admin equivalent. Never acted upon.
    #[serde(default)]
    pub protected: bool,
}

impl SubjectRecord {
    pub fn status(&self) -> SubjectStatus {
        if self.disabled_at.is_some() {
            SubjectStatus::Disabled
        } else {
            SubjectStatus::Active
        }
    }
}

/// Retention status shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    Active,
    Disabled,
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectStatus::Active => f.write_str("Active"),
            SubjectStatus::Disabled => f.write_str("Disabled"),
        }
    }
}

/// A publishable item tracked for age-based retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentId,

    pub content_type: ContentType,

    pub status: ContentStatus,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub published_at: DateTime<Utc>,

    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Field update applied to a subject. `None` clears the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectField {
    DisabledAt(Option<DateTime<Utc>>),
    LastActiveAt(Option<DateTime<Utc>>),
}

impl SubjectField {
    pub fn apply(&self, record: &mut SubjectRecord) {
        match *self {
            SubjectField::DisabledAt(value) => record.disabled_at = value,
            SubjectField::LastActiveAt(value) => record.last_active_at = value,
        }
    }
}

/// Field update applied to a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentField {
    Status(ContentStatus),
    ArchivedAt(Option<DateTime<Utc>>),
}

impl ContentField {
    pub fn apply(&self, record: &mut ContentRecord) {
        match *self {
            ContentField::Status(status) => record.status = status,
            ContentField::ArchivedAt(value) => record.archived_at = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subject() -> SubjectRecord {
        SubjectRecord {
            id: SubjectId(7),
            groups: BTreeSet::from(["subscriber".to_string()]),
            registered_at: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            last_active_at: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
            disabled_at: None,
            protected: false,
        }
    }

    #[test]
    fn test_subject_timestamps_are_epoch_seconds() {
        let json = serde_json::to_value(subject()).unwrap();

        assert_eq!(json["registered_at"], 1_600_000_000);
        assert_eq!(json["last_active_at"], 1_700_000_000);
        assert!(json.get("disabled_at").is_none());
    }

    #[test]
    fn test_subject_missing_optional_fields() {
        let record: SubjectRecord =
            serde_json::from_str(r#"{"id": 3, "registered_at": 1600000000}"#).unwrap();

        assert_eq!(record.id, SubjectId(3));
        assert!(record.groups.is_empty());
        assert!(record.last_active_at.is_none());
        assert!(record.disabled_at.is_none());
        assert!(!record.protected);
        assert_eq!(record.status(), SubjectStatus::Active);
    }

    #[test]
    fn test_field_updates() {
        let mut record = subject();
        let now = Utc.timestamp_opt(1_800_000_000, 0).unwrap();

        SubjectField::DisabledAt(Some(now)).apply(&mut record);
        assert_eq!(record.status(), SubjectStatus::Disabled);

        SubjectField::DisabledAt(None).apply(&mut record);
        SubjectField::LastActiveAt(None).apply(&mut record);
        assert_eq!(record.status(), SubjectStatus::Active);
        assert!(record.last_active_at.is_none());
    }

    #[test]
    fn test_content_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ContentStatus::Archived).unwrap(),
            "\"archived\""
        );
        assert_eq!(ContentType::Page.to_string(), "page");
    }
}

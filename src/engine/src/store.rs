//! Host collaborator interfaces.
//!
//! The engine never owns a datastore. Hosts implement these traits over
//! whatever holds their accounts, content and options; [`crate::memory`]
//! provides an in-memory implementation.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::{
    ContentField, ContentId, GroupKey, SubjectField, SubjectId, SubjectRecord,
};
use crate::retention::query::{ContentFilter, PageRequest, SubjectQuery};
use crate::retention::settings::RetentionSettings;

/// Errors reported by host stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The record is gone. Mutations skip it.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The store cannot serve requests. Aborts the current pass.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused a single mutation. Mutations skip the record.
    #[error("mutation rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether the error ends the current pass instead of a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Source of retention settings.
///
/// Every call is a fresh read; absent fields are merged with defaults.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn retention_settings(&self) -> Result<RetentionSettings, StoreError>;
}

/// Settings storage with a write path for sanitized operator input.
#[async_trait]
pub trait SettingsStore: SettingsProvider {
    async fn store_settings(&self, settings: &RetentionSettings) -> Result<(), StoreError>;

    /// Remove the settings blob entirely.
    async fn delete_settings(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// Groups the host knows about. Empty when the host cannot enumerate them.
    async fn known_groups(&self) -> Result<BTreeSet<GroupKey>, StoreError>;

    /// Identities that must never be acted upon.
    async fn protected_subject_ids(&self) -> Result<BTreeSet<SubjectId>, StoreError>;

    /// Ids matching `query`, ascending, strictly after `page.after`, at most
    /// `page.limit` of them.
    async fn query_subjects(
        &self,
        query: &SubjectQuery,
        page: PageRequest<SubjectId>,
    ) -> Result<Vec<SubjectId>, StoreError>;

    async fn subject(&self, id: SubjectId) -> Result<Option<SubjectRecord>, StoreError>;

    /// Apply all fields atomically.
    async fn mutate_subject(&self, id: SubjectId, fields: &[SubjectField])
    -> Result<(), StoreError>;

    async fn delete_subject(&self, id: SubjectId) -> Result<(), StoreError>;

    /// Clear `disabled_at` and `last_active_at` on every subject. Returns the
    /// number of subjects touched.
    async fn purge_retention_metadata(&self) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Ids matching `filter`, ascending, strictly after `page.after`, at most
    /// `page.limit` of them.
    async fn query_content(
        &self,
        filter: &ContentFilter,
        page: PageRequest<ContentId>,
    ) -> Result<Vec<ContentId>, StoreError>;

    /// Apply all fields atomically.
    async fn mutate_content(&self, id: ContentId, fields: &[ContentField])
    -> Result<(), StoreError>;

    /// Clear `archived_at` on every item. Returns the number of items touched.
    async fn purge_archive_metadata(&self) -> Result<usize, StoreError>;
}

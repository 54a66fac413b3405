//! Fault-injecting store wrapper.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::memory::MemoryStore;
use crate::model::{
    ContentField, ContentId, ContentType, GroupKey, SubjectField, SubjectId, SubjectRecord,
};
use crate::retention::query::{ContentFilter, PageRequest, SubjectQuery};
use crate::retention::settings::RetentionSettings;
use crate::store::{ContentStore, SettingsProvider, SettingsStore, StoreError, SubjectStore};

/// Wraps a [`MemoryStore`] and fails selected calls.
///
/// Everything not configured to fail is delegated unchanged.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    settings_fail: bool,
    groups_fail: bool,
    subject_mutations_unavailable: bool,
    failing_content_queries: BTreeSet<ContentType>,
    vanishing: BTreeSet<SubjectId>,
    rejecting: BTreeSet<SubjectId>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            settings_fail: false,
            groups_fail: false,
            subject_mutations_unavailable: false,
            failing_content_queries: BTreeSet::new(),
            vanishing: BTreeSet::new(),
            rejecting: BTreeSet::new(),
        }
    }

    /// Settings reads report the store as unavailable.
    pub fn failing_settings(mut self) -> Self {
        self.settings_fail = true;
        self
    }

    pub fn failing_groups(mut self) -> Self {
        self.groups_fail = true;
        self
    }

    /// Every subject mutation reports the store as unavailable.
    pub fn unavailable_subject_mutations(mut self) -> Self {
        self.subject_mutations_unavailable = true;
        self
    }

    /// Content queries of this type fail.
    pub fn failing_content_queries(mut self, content_type: ContentType) -> Self {
        self.failing_content_queries.insert(content_type);
        self
    }

    /// The subject is deleted by someone else between fetch and mutation.
    pub fn vanishing_subject(mut self, id: SubjectId) -> Self {
        self.vanishing.insert(id);
        self
    }

    /// Mutations of the subject are refused.
    pub fn rejecting_subject(mut self, id: SubjectId) -> Self {
        self.rejecting.insert(id);
        self
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    async fn check_subject_mutation(&self, id: SubjectId) -> Result<(), StoreError> {
        if self.subject_mutations_unavailable {
            return Err(StoreError::Unavailable("subject store offline".to_string()));
        }
        if self.vanishing.contains(&id) {
            let _ = self.inner.delete_subject(id).await;
            return Err(StoreError::NotFound(format!("subject {id}")));
        }
        if self.rejecting.contains(&id) {
            return Err(StoreError::Rejected(format!("subject {id} is locked")));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsProvider for FlakyStore {
    async fn retention_settings(&self) -> Result<RetentionSettings, StoreError> {
        if self.settings_fail {
            return Err(StoreError::Unavailable("options table offline".to_string()));
        }
        self.inner.retention_settings().await
    }
}

#[async_trait]
impl SettingsStore for FlakyStore {
    async fn store_settings(&self, settings: &RetentionSettings) -> Result<(), StoreError> {
        self.inner.store_settings(settings).await
    }

    async fn delete_settings(&self) -> Result<(), StoreError> {
        self.inner.delete_settings().await
    }
}

#[async_trait]
impl SubjectStore for FlakyStore {
    async fn known_groups(&self) -> Result<BTreeSet<GroupKey>, StoreError> {
        if self.groups_fail {
            return Err(StoreError::Unavailable("role registry offline".to_string()));
        }
        self.inner.known_groups().await
    }

    async fn protected_subject_ids(&self) -> Result<BTreeSet<SubjectId>, StoreError> {
        self.inner.protected_subject_ids().await
    }

    async fn query_subjects(
        &self,
        query: &SubjectQuery,
        page: PageRequest<SubjectId>,
    ) -> Result<Vec<SubjectId>, StoreError> {
        self.inner.query_subjects(query, page).await
    }

    async fn subject(&self, id: SubjectId) -> Result<Option<SubjectRecord>, StoreError> {
        self.inner.subject(id).await
    }

    async fn mutate_subject(
        &self,
        id: SubjectId,
        fields: &[SubjectField],
    ) -> Result<(), StoreError> {
        self.check_subject_mutation(id).await?;
        self.inner.mutate_subject(id, fields).await
    }

    async fn delete_subject(&self, id: SubjectId) -> Result<(), StoreError> {
        self.check_subject_mutation(id).await?;
        self.inner.delete_subject(id).await
    }

    async fn purge_retention_metadata(&self) -> Result<usize, StoreError> {
        self.inner.purge_retention_metadata().await
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn query_content(
        &self,
        filter: &ContentFilter,
        page: PageRequest<ContentId>,
    ) -> Result<Vec<ContentId>, StoreError> {
        if self.failing_content_queries.contains(&filter.content_type) {
            return Err(StoreError::Unavailable(format!(
                "{} index offline",
                filter.content_type
            )));
        }
        self.inner.query_content(filter, page).await
    }

    async fn mutate_content(
        &self,
        id: ContentId,
        fields: &[ContentField],
    ) -> Result<(), StoreError> {
        self.inner.mutate_content(id, fields).await
    }

    async fn purge_archive_metadata(&self) -> Result<usize, StoreError> {
        self.inner.purge_archive_metadata().await
    }
}

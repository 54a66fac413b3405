//! In-memory host store.
//!
//! Implements every collaborator trait over id-ordered maps. Used by the
//! `sunset` binary (loaded from and saved to a JSON snapshot) and by tests.
//! The store is also a [`RunLock`]: the token lives in the option storage,
//! so it travels with the snapshot.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

use crate::model::{
    ContentField, ContentId, ContentRecord, GroupKey, SubjectField, SubjectId, SubjectRecord,
};
use crate::retention::lock::{LockToken, RUN_LOCK_KEY, RunLock, claim};
use crate::retention::query::{ContentFilter, PageRequest, SubjectQuery};
use crate::retention::settings::{RetentionSettings, SETTINGS_KEY};
use crate::store::{ContentStore, SettingsProvider, SettingsStore, StoreError, SubjectStore};

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Host option storage; retention settings live under [`SETTINGS_KEY`],
    /// the run lock token under [`RUN_LOCK_KEY`].
    #[serde(default)]
    pub options: BTreeMap<String, Value>,

    #[serde(default)]
    pub groups: BTreeSet<GroupKey>,

    #[serde(default)]
    pub subjects: Vec<SubjectRecord>,

    #[serde(default)]
    pub content: Vec<ContentRecord>,
}

#[derive(Debug, Default)]
struct State {
    options: BTreeMap<String, Value>,
    groups: BTreeSet<GroupKey>,
    subjects: BTreeMap<SubjectId, SubjectRecord>,
    content: BTreeMap<ContentId, ContentRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    subject_pages: AtomicUsize,
    content_pages: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let state = State {
            options: snapshot.options,
            groups: snapshot.groups,
            subjects: snapshot
                .subjects
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
            content: snapshot
                .content
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
        };

        Self {
            state: RwLock::new(state),
            ..Default::default()
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            options: state.options.clone(),
            groups: state.groups.clone(),
            subjects: state.subjects.values().cloned().collect(),
            content: state.content.values().cloned().collect(),
        }
    }

    /// Insert or replace a subject.
    pub async fn insert_subject(&self, record: SubjectRecord) {
        self.state.write().await.subjects.insert(record.id, record);
    }

    /// Insert or replace a content item.
    pub async fn insert_content(&self, record: ContentRecord) {
        self.state.write().await.content.insert(record.id, record);
    }

    pub async fn set_groups<I, S>(&self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<GroupKey>,
    {
        self.state.write().await.groups = groups.into_iter().map(Into::into).collect();
    }

    /// Store settings as-is, bypassing sanitization.
    pub async fn set_settings(&self, settings: RetentionSettings) {
        if let Ok(value) = serde_json::to_value(settings) {
            self.state
                .write()
                .await
                .options
                .insert(SETTINGS_KEY.to_string(), value);
        }
    }

    pub async fn subject_record(&self, id: SubjectId) -> Option<SubjectRecord> {
        self.state.read().await.subjects.get(&id).cloned()
    }

    pub async fn content_record(&self, id: ContentId) -> Option<ContentRecord> {
        self.state.read().await.content.get(&id).cloned()
    }

    /// Token of the run currently holding the store's run lock.
    pub async fn run_lock_holder(&self) -> Option<LockToken> {
        lock_holder(&self.state.read().await.options)
    }

    /// Subject pages served so far, empty pages included.
    pub fn subject_pages_fetched(&self) -> usize {
        self.subject_pages.load(Ordering::Relaxed)
    }

    /// Content pages served so far, empty pages included.
    pub fn content_pages_fetched(&self) -> usize {
        self.content_pages.load(Ordering::Relaxed)
    }
}

/// A token that no longer parses is reported and treated as absent.
fn lock_holder(options: &BTreeMap<String, Value>) -> Option<LockToken> {
    let value = options.get(RUN_LOCK_KEY)?;
    match serde_json::from_value(value.clone()) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed {RUN_LOCK_KEY} option");
            None
        }
    }
}

fn lower_bound<C>(after: Option<C>) -> Bound<C> {
    match after {
        Some(cursor) => Bound::Excluded(cursor),
        None => Bound::Unbounded,
    }
}

#[async_trait]
impl SettingsProvider for MemoryStore {
    async fn retention_settings(&self) -> Result<RetentionSettings, StoreError> {
        let state = self.state.read().await;
        match state.options.get(SETTINGS_KEY) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                StoreError::Unavailable(format!("malformed {SETTINGS_KEY} option: {e}"))
            }),
            None => Ok(RetentionSettings::default()),
        }
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn store_settings(&self, settings: &RetentionSettings) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(settings).map_err(|e| StoreError::Rejected(e.to_string()))?;
        self.state
            .write()
            .await
            .options
            .insert(SETTINGS_KEY.to_string(), value);
        Ok(())
    }

    async fn delete_settings(&self) -> Result<(), StoreError> {
        self.state.write().await.options.remove(SETTINGS_KEY);
        Ok(())
    }
}

#[async_trait]
impl SubjectStore for MemoryStore {
    async fn known_groups(&self) -> Result<BTreeSet<GroupKey>, StoreError> {
        Ok(self.state.read().await.groups.clone())
    }

    async fn protected_subject_ids(&self) -> Result<BTreeSet<SubjectId>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .subjects
            .values()
            .filter(|record| record.protected)
            .map(|record| record.id)
            .collect())
    }

    async fn query_subjects(
        &self,
        query: &SubjectQuery,
        page: PageRequest<SubjectId>,
    ) -> Result<Vec<SubjectId>, StoreError> {
        self.subject_pages.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        Ok(state
            .subjects
            .range((lower_bound(page.after), Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| query.matches(record))
            .take(page.limit)
            .map(|record| record.id)
            .collect())
    }

    async fn subject(&self, id: SubjectId) -> Result<Option<SubjectRecord>, StoreError> {
        Ok(self.subject_record(id).await)
    }

    async fn mutate_subject(
        &self,
        id: SubjectId,
        fields: &[SubjectField],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .subjects
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))?;
        for field in fields {
            field.apply(record);
        }
        Ok(())
    }

    async fn delete_subject(&self, id: SubjectId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .subjects
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("subject {id}")))
    }

    async fn purge_retention_metadata(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let mut cleared = 0;
        for record in state.subjects.values_mut() {
            if record.disabled_at.is_some() || record.last_active_at.is_some() {
                record.disabled_at = None;
                record.last_active_at = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn query_content(
        &self,
        filter: &ContentFilter,
        page: PageRequest<ContentId>,
    ) -> Result<Vec<ContentId>, StoreError> {
        self.content_pages.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read().await;
        Ok(state
            .content
            .range((lower_bound(page.after), Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| filter.matches(record))
            .take(page.limit)
            .map(|record| record.id)
            .collect())
    }

    async fn mutate_content(
        &self,
        id: ContentId,
        fields: &[ContentField],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .content
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("content {id}")))?;
        for field in fields {
            field.apply(record);
        }
        Ok(())
    }

    async fn purge_archive_metadata(&self) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let mut cleared = 0;
        for record in state.content.values_mut() {
            if record.archived_at.take().is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[async_trait]
impl RunLock for MemoryStore {
    async fn try_acquire(
        &self,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<Option<LockToken>, StoreError> {
        let mut state = self.state.write().await;

        let current = lock_holder(&state.options);
        let Some(token) = claim(current.as_ref(), now, stale_after) else {
            return Ok(None);
        };
        let value =
            serde_json::to_value(&token).map_err(|e| StoreError::Rejected(e.to_string()))?;
        state.options.insert(RUN_LOCK_KEY.to_string(), value);
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if lock_holder(&state.options).is_some_and(|current| current.owner == token.owner) {
            state.options.remove(RUN_LOCK_KEY);
        }
        Ok(())
    }
}

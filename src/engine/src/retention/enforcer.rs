//! Batch Enforcement
//!
//! Drives one enforcement action through the page cycle:
//!
//! ```text
//! FETCH_PAGE -> FILTER_PROTECTED -> APPLY_MUTATION -> EMIT_EVENT -> FETCH_PAGE | DONE
//! ```
//!
//! ## Pagination
//!
//! Pages are keyset-based: every fetch asks for ids strictly greater than the
//! last id of the previous raw page. Mutations remove records from the
//! eligibility filter, so offset paging would skip records; a keyset cursor
//! does not depend on what the previous page did.
//!
//! The loop ends on an empty page or on a page shorter than the requested
//! size, judged on the raw page before protected subjects are removed.
//!
//! ## Failure isolation
//!
//! - `NotFound` and `Rejected` on a mutation skip the record
//! - fetch failures and `Unavailable` abort the action
//! - observer failures are logged and counted

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use common::config::RetentionConfig;

use super::events::{ObserverSet, RetentionEvent};
use super::metrics::RetentionMetrics;
use super::period::RetentionPeriod;
use super::policy::{Partition, UserAction};
use super::query::{ContentFilter, EligibilityQueryBuilder, PageRequest, SubjectQuery};
use crate::model::{ContentField, ContentId, ContentStatus, ContentType, SubjectField, SubjectId};
use crate::store::{ContentStore, StoreError, SubjectStore};

/// The four enforcement actions, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    DisableUsers,
    DeleteUsers,
    ArchiveContent(ContentType),
}

impl EnforcementAction {
    /// Batch-size context key.
    pub fn context(&self) -> &'static str {
        match self {
            EnforcementAction::DisableUsers => "disable_users",
            EnforcementAction::DeleteUsers => "delete_users",
            EnforcementAction::ArchiveContent(ContentType::Post) => "archive_post",
            EnforcementAction::ArchiveContent(ContentType::Page) => "archive_page",
        }
    }
}

impl From<UserAction> for EnforcementAction {
    fn from(action: UserAction) -> Self {
        match action {
            UserAction::Disable => EnforcementAction::DisableUsers,
            UserAction::Delete => EnforcementAction::DeleteUsers,
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.context())
    }
}

/// Counters for one enforcement action.
///
/// In dry-run mode `applied` counts the mutations that would have happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub partitions_evaluated: usize,
    pub pages_fetched: usize,
    pub applied: usize,
    pub protected_skipped: usize,
    pub records_skipped: usize,
    pub observer_failures: usize,
}

/// Result of one enforcement action within a run.
#[derive(Debug, Clone, Serialize)]
pub struct PassResult {
    pub action: EnforcementAction,
    pub tally: Tally,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl PassResult {
    pub fn new(
        action: EnforcementAction,
        tally: Tally,
        outcome: Result<(), EnforcementError>,
        duration_ms: u64,
    ) -> Self {
        Self {
            action,
            tally,
            duration_ms,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("failed to list known groups: {0}")]
    Groups(#[source] StoreError),

    #[error("failed to load protected subjects: {0}")]
    Protected(#[source] StoreError),

    #[error("failed to fetch {context} page: {source}")]
    Fetch {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("store failed while applying {context} to {target}: {source}")]
    Mutation {
        context: &'static str,
        target: String,
        #[source]
        source: StoreError,
    },
}

/// Applies one run's mutations. Created per run with the run's clock.
pub struct BatchEnforcer<'a> {
    subjects: &'a dyn SubjectStore,
    content: &'a dyn ContentStore,
    observers: &'a ObserverSet,
    metrics: &'a RetentionMetrics,
    config: &'a RetentionConfig,
    now: DateTime<Utc>,
}

impl<'a> BatchEnforcer<'a> {
    pub fn new(
        subjects: &'a dyn SubjectStore,
        content: &'a dyn ContentStore,
        observers: &'a ObserverSet,
        metrics: &'a RetentionMetrics,
        config: &'a RetentionConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subjects,
            content,
            observers,
            metrics,
            config,
            now,
        }
    }

    /// Run a user action over its partitions, overrides first.
    pub async fn enforce_user_action(
        &self,
        action: UserAction,
        partitions: &[Partition],
        tally: &mut Tally,
    ) -> Result<(), EnforcementError> {
        let context = EnforcementAction::from(action).context();

        let targets: Vec<(&Partition, DateTime<Utc>)> = partitions
            .iter()
            .filter_map(|partition| {
                let threshold = self.threshold(context, partition.period)?;
                Some((partition, threshold))
            })
            .collect();

        if targets.is_empty() {
            debug!(action = context, "No effective policy, skipping");
            return Ok(());
        }

        let protected = self
            .subjects
            .protected_subject_ids()
            .await
            .map_err(EnforcementError::Protected)?;

        for (partition, threshold) in targets {
            info!(
                action = context,
                partition = %partition.source,
                period = %partition.period,
                threshold = %threshold.format("%Y-%m-%d %H:%M:%S UTC"),
                dry_run = self.config.dry_run,
                "Enforcing retention partition"
            );
            tally.partitions_evaluated += 1;

            match action {
                UserAction::Disable => {
                    for query in EligibilityQueryBuilder::disable_queries(partition, threshold) {
                        self.drain_subjects(action, &query, &protected, tally)
                            .await?;
                    }
                }
                UserAction::Delete => {
                    let query = EligibilityQueryBuilder::delete_query(partition, threshold);
                    self.drain_subjects(action, &query, &protected, tally)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Archive published items of one type older than `period`.
    pub async fn enforce_archive(
        &self,
        content_type: ContentType,
        period: RetentionPeriod,
        tally: &mut Tally,
    ) -> Result<(), EnforcementError> {
        let context = EnforcementAction::ArchiveContent(content_type).context();

        let Some(threshold) = self.threshold(context, period) else {
            debug!(action = context, "No effective policy, skipping");
            return Ok(());
        };

        info!(
            action = context,
            period = %period,
            threshold = %threshold.format("%Y-%m-%d %H:%M:%S UTC"),
            dry_run = self.config.dry_run,
            "Enforcing content archive policy"
        );
        tally.partitions_evaluated += 1;

        let filter = EligibilityQueryBuilder::archive_filter(content_type, threshold);
        self.drain_content(content_type, &filter, tally).await
    }

    fn threshold(&self, context: &str, period: RetentionPeriod) -> Option<DateTime<Utc>> {
        if !period.has_effect() {
            return None;
        }
        let threshold = period.threshold(self.now);
        if threshold.is_none() {
            warn!(
                action = context,
                period = %period,
                "Retention period exceeds the representable time range, skipping"
            );
        }
        self.metrics.record_threshold_computed();
        threshold
    }

    async fn drain_subjects(
        &self,
        action: UserAction,
        query: &SubjectQuery,
        protected: &BTreeSet<SubjectId>,
        tally: &mut Tally,
    ) -> Result<(), EnforcementError> {
        let context = EnforcementAction::from(action).context();
        let limit = self.config.batch_size(context);
        let mut page = PageRequest::first(limit);

        loop {
            let ids = self
                .subjects
                .query_subjects(query, page)
                .await
                .map_err(|source| EnforcementError::Fetch { context, source })?;

            tally.pages_fetched += 1;
            self.metrics.record_page_fetched();

            let Some(last) = ids.last().copied() else {
                break;
            };
            let exhausted = ids.len() < limit;
            page = PageRequest::next(last, limit);

            debug!(
                action = context,
                query = query.kind.as_str(),
                page_len = ids.len(),
                "Fetched subject page"
            );

            let before = ids.len();
            let eligible: Vec<SubjectId> =
                ids.into_iter().filter(|id| !protected.contains(id)).collect();
            let skipped = before - eligible.len();
            if skipped > 0 {
                tally.protected_skipped += skipped;
                self.metrics.record_protected_skipped(skipped);
            }

            for id in eligible {
                self.apply_subject(action, id, tally).await?;
            }

            if exhausted {
                break;
            }
        }

        Ok(())
    }

    async fn apply_subject(
        &self,
        action: UserAction,
        id: SubjectId,
        tally: &mut Tally,
    ) -> Result<(), EnforcementError> {
        let context = EnforcementAction::from(action).context();

        if self.config.dry_run {
            info!(action = context, subject_id = %id, "[DRY RUN] Would {} subject", action);
            tally.applied += 1;
            return Ok(());
        }

        let (outcome, event) = match action {
            UserAction::Disable => (
                self.subjects
                    .mutate_subject(id, &[SubjectField::DisabledAt(Some(self.now))])
                    .await,
                RetentionEvent::user_disabled(id, self.now),
            ),
            UserAction::Delete => (
                self.subjects.delete_subject(id).await,
                RetentionEvent::user_deleted(id, self.now),
            ),
        };

        match outcome {
            Ok(()) => {
                tally.applied += 1;
                match action {
                    UserAction::Disable => self.metrics.record_subjects_disabled(1),
                    UserAction::Delete => self.metrics.record_subjects_deleted(1),
                }
                self.emit(&event, tally);
                Ok(())
            }
            Err(source) if source.is_fatal() => Err(EnforcementError::Mutation {
                context,
                target: format!("subject {id}"),
                source,
            }),
            Err(e) => {
                warn!(action = context, subject_id = %id, error = %e, "Skipping subject");
                tally.records_skipped += 1;
                self.metrics.record_record_skipped();
                Ok(())
            }
        }
    }

    async fn drain_content(
        &self,
        content_type: ContentType,
        filter: &ContentFilter,
        tally: &mut Tally,
    ) -> Result<(), EnforcementError> {
        let context = EnforcementAction::ArchiveContent(content_type).context();
        let limit = self.config.batch_size(context);
        let mut page = PageRequest::first(limit);

        loop {
            let ids = self
                .content
                .query_content(filter, page)
                .await
                .map_err(|source| EnforcementError::Fetch { context, source })?;

            tally.pages_fetched += 1;
            self.metrics.record_page_fetched();

            let Some(last) = ids.last().copied() else {
                break;
            };
            let exhausted = ids.len() < limit;
            page = PageRequest::next(last, limit);

            for id in ids {
                self.apply_archive(content_type, id, tally).await?;
            }

            if exhausted {
                break;
            }
        }

        Ok(())
    }

    async fn apply_archive(
        &self,
        content_type: ContentType,
        id: ContentId,
        tally: &mut Tally,
    ) -> Result<(), EnforcementError> {
        let context = EnforcementAction::ArchiveContent(content_type).context();

        if self.config.dry_run {
            info!(action = context, content_id = %id, "[DRY RUN] Would archive {}", content_type);
            tally.applied += 1;
            return Ok(());
        }

        let fields = [
            ContentField::Status(ContentStatus::Archived),
            ContentField::ArchivedAt(Some(self.now)),
        ];

        match self.content.mutate_content(id, &fields).await {
            Ok(()) => {
                tally.applied += 1;
                self.metrics.record_content_archived(1);
                self.emit(
                    &RetentionEvent::content_archived(id, content_type, self.now),
                    tally,
                );
                Ok(())
            }
            Err(source) if source.is_fatal() => Err(EnforcementError::Mutation {
                context,
                target: format!("{content_type} {id}"),
                source,
            }),
            Err(e) => {
                warn!(action = context, content_id = %id, error = %e, "Skipping content item");
                tally.records_skipped += 1;
                self.metrics.record_record_skipped();
                Ok(())
            }
        }
    }

    fn emit(&self, event: &RetentionEvent, tally: &mut Tally) {
        let failures = self.observers.emit(event);
        if failures > 0 {
            tally.observer_failures += failures;
            self.metrics.record_observer_failures(failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::{ContentRecord, SubjectRecord};
    use crate::retention::events::MockRetentionObserver;
    use crate::retention::policy::{GroupConstraint, PolicySource};
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - TimeDelta::days(days)
    }

    fn subject(id: u64, last_active_days: i64) -> SubjectRecord {
        SubjectRecord {
            id: SubjectId(id),
            groups: BTreeSet::from(["subscriber".to_string()]),
            registered_at: days_ago(1000),
            last_active_at: Some(days_ago(last_active_days)),
            disabled_at: None,
            protected: false,
        }
    }

    fn default_partition(period: RetentionPeriod) -> Partition {
        Partition {
            groups: GroupConstraint {
                include: None,
                exclude: BTreeSet::from(["administrator".to_string()]),
            },
            period,
            source: PolicySource::Default,
        }
    }

    fn config(batch: usize) -> RetentionConfig {
        let mut config = RetentionConfig::default();
        config.batch_sizes.disable_users = batch;
        config.batch_sizes.delete_users = batch;
        config.batch_sizes.archive_post = batch;
        config
    }

    #[tokio::test]
    async fn test_zero_period_issues_no_query() {
        let store = MemoryStore::new();
        store.insert_subject(subject(1, 500)).await;
        let observers = ObserverSet::new();
        let metrics = RetentionMetrics::new();
        let config = config(100);
        let enforcer = BatchEnforcer::new(&store, &store, &observers, &metrics, &config, now());

        let mut tally = Tally::default();
        enforcer
            .enforce_user_action(
                UserAction::Disable,
                &[default_partition(RetentionPeriod::DISABLED)],
                &mut tally,
            )
            .await
            .unwrap();

        assert_eq!(tally, Tally::default());
        assert_eq!(store.subject_pages_fetched(), 0);
        assert_eq!(metrics.thresholds_computed(), 0);
    }

    #[tokio::test]
    async fn test_protected_removed_after_termination_check() {
        let store = MemoryStore::new();
        for id in 1..=3 {
            store.insert_subject(subject(id, 100)).await;
        }
        let mut admin = subject(2, 100);
        admin.protected = true;
        store.insert_subject(admin).await;

        let observers = ObserverSet::new();
        let metrics = RetentionMetrics::new();
        let config = config(3);
        let enforcer = BatchEnforcer::new(&store, &store, &observers, &metrics, &config, now());

        let mut tally = Tally::default();
        enforcer
            .enforce_user_action(
                UserAction::Disable,
                &[default_partition(RetentionPeriod::days(30))],
                &mut tally,
            )
            .await
            .unwrap();

        // A full raw page of 3 means one more fetch even though only 2 were
        // eligible; the never-active query adds a third, empty fetch.
        assert_eq!(tally.pages_fetched, 3);
        assert_eq!(tally.applied, 2);
        assert_eq!(tally.protected_skipped, 1);
        let admin = store.subject_record(SubjectId(2)).await.unwrap();
        assert!(admin.disabled_at.is_none());
    }

    #[tokio::test]
    async fn test_observer_failure_is_counted_not_fatal() {
        let store = MemoryStore::new();
        store.insert_subject(subject(1, 100)).await;
        store.insert_subject(subject(2, 100)).await;

        let mut observer = MockRetentionObserver::new();
        observer
            .expect_on_event()
            .times(2)
            .returning(|_| Err(anyhow::anyhow!("webhook down")));
        let mut observers = ObserverSet::new();
        observers.push(Arc::new(observer));

        let metrics = RetentionMetrics::new();
        let config = config(100);
        let enforcer = BatchEnforcer::new(&store, &store, &observers, &metrics, &config, now());

        let mut tally = Tally::default();
        enforcer
            .enforce_user_action(
                UserAction::Disable,
                &[default_partition(RetentionPeriod::days(30))],
                &mut tally,
            )
            .await
            .unwrap();

        assert_eq!(tally.applied, 2);
        assert_eq!(tally.observer_failures, 2);
        assert_eq!(metrics.observer_failures(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_mutating() {
        let store = MemoryStore::new();
        for id in 1..=5 {
            store.insert_subject(subject(id, 100)).await;
        }

        let mut observer = MockRetentionObserver::new();
        observer.expect_on_event().never();
        let mut observers = ObserverSet::new();
        observers.push(Arc::new(observer));

        let metrics = RetentionMetrics::new();
        let mut config = config(2);
        config.dry_run = true;
        let enforcer = BatchEnforcer::new(&store, &store, &observers, &metrics, &config, now());

        let mut tally = Tally::default();
        enforcer
            .enforce_user_action(
                UserAction::Disable,
                &[default_partition(RetentionPeriod::days(30))],
                &mut tally,
            )
            .await
            .unwrap();

        assert_eq!(tally.applied, 5);
        assert_eq!(metrics.subjects_disabled(), 0);
        for id in 1..=5 {
            let record = store.subject_record(SubjectId(id)).await.unwrap();
            assert!(record.disabled_at.is_none());
        }
    }

    #[tokio::test]
    async fn test_archive_sets_status_and_timestamp() {
        let store = MemoryStore::new();
        store
            .insert_content(ContentRecord {
                id: ContentId(10),
                content_type: ContentType::Post,
                status: ContentStatus::Published,
                published_at: days_ago(400),
                archived_at: None,
            })
            .await;

        let observers = ObserverSet::new();
        let metrics = RetentionMetrics::new();
        let config = config(100);
        let enforcer = BatchEnforcer::new(&store, &store, &observers, &metrics, &config, now());

        let mut tally = Tally::default();
        enforcer
            .enforce_archive(ContentType::Post, RetentionPeriod::days(365), &mut tally)
            .await
            .unwrap();

        let post = store.content_record(ContentId(10)).await.unwrap();
        assert_eq!(post.status, ContentStatus::Archived);
        assert_eq!(post.archived_at, Some(now()));
        assert_eq!(tally.applied, 1);
        assert_eq!(metrics.content_archived(), 1);
    }

    #[test]
    fn test_action_contexts() {
        assert_eq!(EnforcementAction::DisableUsers.context(), "disable_users");
        assert_eq!(EnforcementAction::DeleteUsers.context(), "delete_users");
        assert_eq!(
            EnforcementAction::ArchiveContent(ContentType::Post).to_string(),
            "archive_post"
        );
        assert_eq!(
            EnforcementAction::from(UserAction::Delete),
            EnforcementAction::DeleteUsers
        );
    }
}

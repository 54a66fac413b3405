//! Run orchestration.
//!
//! One invocation runs the passes in a fixed order:
//!
//! 1. disable users (group overrides, then the default remainder)
//! 2. delete users (group overrides, then the default remainder)
//! 3. archive posts
//! 4. archive pages
//!
//! Disable precedes delete, so a subject disabled in this run carries
//! `disabled_at = now` and cannot reach any delete threshold in the same run.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use common::config::RetentionConfig;

use super::enforcer::{BatchEnforcer, EnforcementAction, EnforcementError, PassResult, Tally};
use super::events::{ObserverSet, RetentionObserver};
use super::lock::{LocalRunLock, RunLock};
use super::metrics::RetentionMetrics;
use super::policy::{PolicyResolver, UserAction};
use crate::model::ContentType;
use crate::store::{ContentStore, SettingsProvider, StoreError, SubjectStore};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("another retention run is in progress")]
    AlreadyRunning,

    #[error("failed to read retention settings: {0}")]
    Settings(#[source] StoreError),

    #[error("failed to acquire run lock: {0}")]
    Lock(#[source] StoreError),
}

/// Result of a complete retention run
#[derive(Debug, Clone, Serialize)]
pub struct RetentionRunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub passes: Vec<PassResult>,
}

impl RetentionRunResult {
    pub fn pass(&self, action: EnforcementAction) -> Option<&PassResult> {
        self.passes.iter().find(|pass| pass.action == action)
    }

    pub fn applied(&self, action: EnforcementAction) -> usize {
        self.pass(action).map_or(0, |pass| pass.tally.applied)
    }

    pub fn failed_passes(&self) -> impl Iterator<Item = &PassResult> {
        self.passes.iter().filter(|pass| !pass.succeeded())
    }

    pub fn is_clean(&self) -> bool {
        self.passes.iter().all(PassResult::succeeded)
    }
}

/// Entry point invoked by the host's periodic tick.
pub struct RetentionOrchestrator {
    settings: Arc<dyn SettingsProvider>,
    subjects: Arc<dyn SubjectStore>,
    content: Arc<dyn ContentStore>,
    config: RetentionConfig,
    observers: ObserverSet,
    run_lock: Arc<dyn RunLock>,
    metrics: RetentionMetrics,
}

impl RetentionOrchestrator {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        subjects: Arc<dyn SubjectStore>,
        content: Arc<dyn ContentStore>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            settings,
            subjects,
            content,
            config,
            observers: ObserverSet::new(),
            run_lock: Arc::new(LocalRunLock::new()),
            metrics: RetentionMetrics::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetentionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Share a run lock between orchestrators (or hosts).
    pub fn with_run_lock(mut self, run_lock: Arc<dyn RunLock>) -> Self {
        self.run_lock = run_lock;
        self
    }

    pub fn with_metrics(mut self, metrics: RetentionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RetentionMetrics {
        &self.metrics
    }

    pub async fn run(&self) -> Result<RetentionRunResult, RunError> {
        self.run_at(Utc::now()).await
    }

    /// Run every pass against the clock reading `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RetentionRunResult, RunError> {
        let stale_after =
            TimeDelta::from_std(self.config.run_lock_timeout).unwrap_or(TimeDelta::MAX);

        let token = self
            .run_lock
            .try_acquire(now, stale_after)
            .await
            .map_err(RunError::Lock)?
            .ok_or(RunError::AlreadyRunning)?;

        let outcome = self.execute(now).await;

        if let Err(e) = self.run_lock.release(&token).await {
            warn!(owner = %token.owner, error = %e, "Failed to release retention run lock");
        }

        outcome
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<RetentionRunResult, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();

        info!(
            run_id = %run_id,
            now = %now,
            dry_run = self.config.dry_run,
            "Starting retention run"
        );

        let settings = self
            .settings
            .retention_settings()
            .await
            .map_err(RunError::Settings)?;

        let enforcer = BatchEnforcer::new(
            self.subjects.as_ref(),
            self.content.as_ref(),
            &self.observers,
            &self.metrics,
            &self.config,
            now,
        );

        let mut passes = Vec::with_capacity(4);
        let user_actions = [UserAction::Disable, UserAction::Delete];

        match self.subjects.known_groups().await {
            Ok(known_groups) => {
                let excluded_groups = self.config.excluded_group_set();
                let resolver = PolicyResolver::new(&settings, &known_groups, &excluded_groups);

                for action in user_actions {
                    let partitions = resolver.partitions(action);
                    let timer = Instant::now();
                    let mut tally = Tally::default();
                    let outcome = enforcer
                        .enforce_user_action(action, &partitions, &mut tally)
                        .await;
                    passes.push(self.finish_pass(
                        action.into(),
                        tally,
                        outcome,
                        timer,
                    ));
                }
            }
            Err(e) => {
                for action in user_actions {
                    passes.push(self.finish_pass(
                        action.into(),
                        Tally::default(),
                        Err(EnforcementError::Groups(e.clone())),
                        Instant::now(),
                    ));
                }
            }
        }

        for content_type in ContentType::ALL {
            let timer = Instant::now();
            let mut tally = Tally::default();
            let outcome = enforcer
                .enforce_archive(content_type, settings.archive_period(content_type), &mut tally)
                .await;
            passes.push(self.finish_pass(
                EnforcementAction::ArchiveContent(content_type),
                tally,
                outcome,
                timer,
            ));
        }

        let completed_at = Utc::now();
        let duration_ms = timer.elapsed().as_millis() as u64;
        self.metrics.record_duration_ms(duration_ms);

        let result = RetentionRunResult {
            run_id,
            started_at,
            completed_at,
            dry_run: self.config.dry_run,
            passes,
        };

        info!(
            run_id = %run_id,
            disabled = result.applied(EnforcementAction::DisableUsers),
            deleted = result.applied(EnforcementAction::DeleteUsers),
            posts_archived = result.applied(EnforcementAction::ArchiveContent(ContentType::Post)),
            pages_archived = result.applied(EnforcementAction::ArchiveContent(ContentType::Page)),
            failed_passes = result.failed_passes().count(),
            duration_ms,
            "Retention run completed"
        );

        Ok(result)
    }

    fn finish_pass(
        &self,
        action: EnforcementAction,
        tally: Tally,
        outcome: Result<(), EnforcementError>,
        timer: Instant,
    ) -> PassResult {
        let duration_ms = timer.elapsed().as_millis() as u64;

        match &outcome {
            Ok(()) => info!(
                action = %action,
                applied = tally.applied,
                pages = tally.pages_fetched,
                skipped = tally.records_skipped,
                duration_ms,
                "Retention pass completed"
            ),
            Err(e) => {
                self.metrics.record_pass_failed();
                warn!(
                    action = %action,
                    applied = tally.applied,
                    error = %e,
                    "Retention pass failed"
                );
            }
        }

        PassResult::new(action, tally, outcome, duration_ms)
    }
}

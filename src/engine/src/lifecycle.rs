//! Subject lifecycle hooks and operator actions.
//!
//! The host calls these from its authentication, registration and admin
//! flows. They maintain the timestamps the retention passes read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{SubjectField, SubjectId, SubjectStatus};
use crate::retention::settings::{RetentionSettings, SanitizedSettings, sanitize_settings};
use crate::store::{ContentStore, SettingsStore, StoreError, SubjectStore};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("account {0} has been disabled due to inactivity, contact an administrator")]
    AccountDisabled(SubjectId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Retention status of one subject, for admin listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionStatus {
    pub id: SubjectId,
    pub status: SubjectStatus,
    pub last_active_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

/// What an uninstall cleanup removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub subjects_cleared: usize,
    pub content_cleared: usize,
}

pub struct SubjectLifecycle {
    settings: Arc<dyn SettingsStore>,
    subjects: Arc<dyn SubjectStore>,
    content: Arc<dyn ContentStore>,
}

impl SubjectLifecycle {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        subjects: Arc<dyn SubjectStore>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            settings,
            subjects,
            content,
        }
    }

    /// Gate called during authentication. Unknown subjects pass; the host's
    /// own authentication rejects them.
    pub async fn check_login(&self, id: SubjectId) -> Result<(), LoginError> {
        match self.subjects.subject(id).await? {
            Some(record) if record.disabled_at.is_some() => {
                info!(subject_id = %id, "Rejected login for disabled subject");
                Err(LoginError::AccountDisabled(id))
            }
            _ => Ok(()),
        }
    }

    /// Successful login: refresh activity and re-activate.
    pub async fn record_login(&self, id: SubjectId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.subjects
            .mutate_subject(
                id,
                &[
                    SubjectField::LastActiveAt(Some(now)),
                    SubjectField::DisabledAt(None),
                ],
            )
            .await?;
        debug!(subject_id = %id, "Recorded login");
        Ok(())
    }

    pub async fn record_registration(
        &self,
        id: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.subjects
            .mutate_subject(id, &[SubjectField::LastActiveAt(Some(now))])
            .await
    }

    /// Host-side deletion: drop the engine's timestamps. A subject that is
    /// already gone is fine.
    pub async fn on_subject_deleted(&self, id: SubjectId) -> Result<(), StoreError> {
        let fields = [
            SubjectField::DisabledAt(None),
            SubjectField::LastActiveAt(None),
        ];
        match self.subjects.mutate_subject(id, &fields).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Operator re-enable.
    pub async fn reenable(&self, id: SubjectId) -> Result<(), StoreError> {
        self.subjects
            .mutate_subject(id, &[SubjectField::DisabledAt(None)])
            .await?;
        info!(subject_id = %id, "Subject re-enabled");
        Ok(())
    }

    pub async fn status(&self, id: SubjectId) -> Result<Option<RetentionStatus>, StoreError> {
        let record = self.subjects.subject(id).await?;
        Ok(record.map(|record| RetentionStatus {
            id: record.id,
            status: record.status(),
            last_active_at: record.last_active_at,
            disabled_at: record.disabled_at,
        }))
    }

    /// Sanitize operator input against the host's groups and persist it.
    pub async fn save_settings(
        &self,
        input: RetentionSettings,
    ) -> Result<SanitizedSettings, StoreError> {
        let known_groups = self.subjects.known_groups().await?;
        let sanitized = sanitize_settings(input, &known_groups);

        for warning in &sanitized.warnings {
            warn!(warning = %warning, "Retention settings corrected");
        }

        self.settings.store_settings(&sanitized.settings).await?;
        Ok(sanitized)
    }

    /// Remove every engine-owned field and the settings blob.
    pub async fn purge_all(&self) -> Result<PurgeReport, StoreError> {
        let report = PurgeReport {
            subjects_cleared: self.subjects.purge_retention_metadata().await?,
            content_cleared: self.content.purge_archive_metadata().await?,
        };
        self.settings.delete_settings().await?;

        info!(
            subjects_cleared = report.subjects_cleared,
            content_cleared = report.content_cleared,
            "Retention metadata purged"
        );
        Ok(report)
    }
}

//! Run lock rejecting overlapping invocations.
//!
//! [`LocalRunLock`] guards runs inside one process. Stores that outlive the
//! process keep the token in their option storage under [`RUN_LOCK_KEY`]
//! (see the [`crate::memory::MemoryStore`] implementation), so separate
//! processes sharing that storage exclude each other.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::store::StoreError;

/// Option key under which store-backed locks persist the current token.
pub const RUN_LOCK_KEY: &str = "sunset_run_lock";

/// Proof of lock ownership, handed back on release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub owner: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl LockToken {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            owner: Uuid::new_v4(),
            acquired_at: now,
        }
    }

    /// Whether the run holding this token still counts as alive at `now`.
    pub fn is_live(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> bool {
        now - self.acquired_at < stale_after
    }
}

/// New token for the caller, unless `current` is still live.
pub(crate) fn claim(
    current: Option<&LockToken>,
    now: DateTime<Utc>,
    stale_after: TimeDelta,
) -> Option<LockToken> {
    if let Some(current) = current {
        if current.is_live(now, stale_after) {
            return None;
        }
        warn!(
            owner = %current.owner,
            acquired_at = %current.acquired_at,
            "Taking over stale retention run lock"
        );
    }
    Some(LockToken::new(now))
}

/// Mutual exclusion between retention runs.
///
/// A lock held longer than `stale_after` belongs to a crashed run and may be
/// taken over.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// `Ok(None)` when another live run holds the lock.
    async fn try_acquire(
        &self,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<Option<LockToken>, StoreError>;

    async fn release(&self, token: &LockToken) -> Result<(), StoreError>;
}

/// Process-local run lock.
#[derive(Debug, Default)]
pub struct LocalRunLock {
    holder: Mutex<Option<LockToken>>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self) -> bool {
        self.holder.lock().await.is_some()
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(
        &self,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<Option<LockToken>, StoreError> {
        let mut holder = self.holder.lock().await;

        let Some(token) = claim(holder.as_ref(), now, stale_after) else {
            return Ok(None);
        };
        *holder = Some(token.clone());
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> Result<(), StoreError> {
        let mut holder = self.holder.lock().await;
        // A run whose lock was taken over must not release the new holder's lock.
        if holder.as_ref().is_some_and(|current| current.owner == token.owner) {
            *holder = None;
        }
        Ok(())
    }
}

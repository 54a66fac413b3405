//! JSON snapshot persistence for the in-memory store.
//!
//! Every command that writes the snapshot first claims the run lock stored
//! inside it ([`lock`]), works on the image loaded under that lock, and
//! writes back through [`LockedSnapshot::commit`]. Separate `sunset`
//! processes therefore never overwrite each other's changes. Each
//! read-modify-write of the file itself happens under a short-lived
//! `<snapshot>.json.lock` marker file.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use engine::memory::{MemoryStore, Snapshot};
use engine::retention::{LockToken, RunLock};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const EDIT_RETRIES: u32 = 100;
const EDIT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Load a snapshot. A missing file is an empty store.
pub async fn load(path: &Path) -> Result<Snapshot> {
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to access snapshot {}", path.display()))?
    {
        tracing::info!(path = %path.display(), "Snapshot not found, starting empty");
        return Ok(Snapshot::default());
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;

    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

/// Write a snapshot through a temporary file so readers never see a partial one.
pub async fn save(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace snapshot {}", path.display()))?;

    tracing::debug!(path = %path.display(), "Snapshot saved");
    Ok(())
}

/// Marker file held while one process reads and rewrites the snapshot.
struct EditGuard {
    path: PathBuf,
}

impl EditGuard {
    async fn acquire(snapshot: &Path) -> Result<Self> {
        if let Some(parent) = snapshot.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let path = snapshot.with_extension("json.lock");
        for _ in 0..EDIT_RETRIES {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tokio::time::sleep(EDIT_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create {}", path.display()));
                }
            }
        }

        bail!(
            "Snapshot {} is being edited by another process (remove {} if none is running)",
            snapshot.display(),
            path.display()
        )
    }
}

impl Drop for EditGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove snapshot edit marker"
            );
        }
    }
}

/// A snapshot loaded under its run lock.
pub struct LockedSnapshot {
    path: PathBuf,
    store: Arc<MemoryStore>,
    token: LockToken,
}

/// Claim the run lock recorded in the snapshot at `path` and load the store
/// under it. `Ok(None)` when another live process holds the lock.
pub async fn lock(
    path: &Path,
    now: DateTime<Utc>,
    stale_after: TimeDelta,
) -> Result<Option<LockedSnapshot>> {
    let _guard = EditGuard::acquire(path).await?;

    let store = Arc::new(MemoryStore::from_snapshot(load(path).await?));
    let Some(token) = store
        .try_acquire(now, stale_after)
        .await
        .context("Failed to claim snapshot run lock")?
    else {
        return Ok(None);
    };
    save(path, &store.snapshot().await).await?;

    tracing::debug!(path = %path.display(), owner = %token.owner, "Snapshot run lock acquired");
    Ok(Some(LockedSnapshot {
        path: path.to_path_buf(),
        store,
        token,
    }))
}

impl LockedSnapshot {
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Write the store back and release the lock.
    pub async fn commit(self) -> Result<()> {
        self.finish(true).await
    }

    /// Release the lock, discarding in-memory changes.
    pub async fn release(self) -> Result<()> {
        self.finish(false).await
    }

    async fn finish(self, persist: bool) -> Result<()> {
        let _guard = EditGuard::acquire(&self.path).await?;

        let on_disk = MemoryStore::from_snapshot(load(&self.path).await?);
        let holder = on_disk.run_lock_holder().await;
        if holder.as_ref().map(|token| token.owner) != Some(self.token.owner) {
            bail!(
                "Run lock on {} was taken over by another process; changes were not saved",
                self.path.display()
            );
        }

        let target = if persist { self.store.as_ref() } else { &on_disk };
        target
            .release(&self.token)
            .await
            .context("Failed to release snapshot run lock")?;
        save(&self.path, &target.snapshot().await).await
    }
}

//! Cross-process install lock.
//!
//! Only one installer may drive the install orchestrator at a time, even when
//! several processes watch the same status file (an old process finishing a
//! handoff and its successor, or an operator running `steward install` next to
//! a running `serve`). The lock is an OS advisory lock on
//! `<install_root>/.locks/install.lock`, held for the whole install cycle and
//! released when the guard is dropped.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use crate::core::StewardError;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

/// Guard for the exclusive install lock.
#[derive(Debug)]
pub struct InstallLock {
    _file: Arc<File>,
    lock_path: PathBuf,
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        // The file is kept; removing it would let a waiter lock a stale inode.
        debug!(lock_path = %self.lock_path.display(), "Install lock released");
    }
}

impl InstallLock {
    /// Lock file location for an installation root.
    pub fn path_for(install_root: &Path) -> PathBuf {
        install_root.join(".locks").join("install.lock")
    }

    /// Acquire the lock, retrying with exponential backoff until `timeout`.
    ///
    /// Fails with [`StewardError::InstallInProgress`] when another holder keeps
    /// the lock past the deadline.
    pub async fn acquire(install_root: &Path, timeout: Duration) -> Result<Self> {
        let lock_path = Self::path_for(install_root);
        let locks_dir = lock_path.parent().map(Path::to_path_buf).unwrap_or_default();
        tokio::fs::create_dir_all(&locks_dir).await.with_context(|| {
            format!("Failed to create locks directory: {}", locks_dir.display())
        })?;

        debug!(lock_path = %lock_path.display(), "Waiting for install lock");

        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .with_context(|| "spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let file = Arc::new(file);

        let start = std::time::Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let file_clone = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || file_clone.try_lock_exclusive())
                .await
                .with_context(|| "spawn_blocking panicked")?;

            if let Ok(true) = locked {
                debug!(
                    lock_path = %lock_path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "Install lock acquired"
                );
                return Ok(Self {
                    _file: file,
                    lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(StewardError::InstallInProgress {
            lock_path: lock_path.display().to_string(),
        }
        .into())
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

use super::installation::InstallLayout;
use crate::core::StewardError;
use crate::utils::fs::{ensure_dir, remove_dir_if_exists, rename_if_exists};
use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, warn};

/// Rotates installation slots around an install.
///
/// `BackupManager` owns the moves between `active/`, `previous/`, and
/// `retired/` so that at every instant at least one complete installation
/// exists on disk. All moves are renames within the installation root, so a
/// slot is either fully present or absent.
///
/// # Rotation
///
/// Before an install:
///
/// 1. a stale `retired/` (from an unconfirmed earlier handoff) is removed
/// 2. `previous/` is moved to `retired/`
/// 3. `active/` is moved to `previous/`
///
/// After the successor confirms its startup, [`cleanup_retired`] deletes
/// `retired/`, which leaves exactly one rollback generation.
///
/// If the install fails before handoff, [`restore`] reverses the rotation.
///
/// [`cleanup_retired`]: BackupManager::cleanup_retired
/// [`restore`]: BackupManager::restore
///
/// # Examples
///
/// ```rust,no_run
/// use steward::upgrade::backup::BackupManager;
/// use steward::upgrade::installation::InstallLayout;
///
/// # async fn example() -> anyhow::Result<()> {
/// let backups = BackupManager::new(InstallLayout::new("/srv/svc"));
///
/// backups.create_backup().await?;
/// // ... extract the new release into active/ ...
/// let install_failed = false;
/// if install_failed {
///     backups.restore().await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackupManager {
    layout: InstallLayout,
}

impl BackupManager {
    pub fn new(layout: InstallLayout) -> Self {
        Self {
            layout,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Move the current installation into `previous/`.
    ///
    /// Returns `false` when there was no active installation to back up
    /// (first install).
    pub async fn create_backup(&self) -> Result<bool> {
        let active = self.layout.active_dir();
        let previous = self.layout.previous_dir();
        let retired = self.layout.retired_dir();

        ensure_dir(self.layout.root())?;

        if remove_dir_if_exists(&retired).await? {
            debug!("Removed stale retired installation at {:?}", retired);
        }
        if rename_if_exists(&previous, &retired).await? {
            debug!("Retired previous installation to {:?}", retired);
        }

        if !fs::try_exists(&active).await.unwrap_or(false) {
            info!("No active installation to back up");
            return Ok(false);
        }

        info!("Backing up active installation to {:?}", previous);
        fs::rename(&active, &previous)
            .await
            .with_context(|| format!("Failed to move {} to {}", active.display(), previous.display()))?;
        Ok(true)
    }

    /// Put `previous/` back into `active/` and `retired/` back into `previous/`.
    ///
    /// Retries a few times; some platforms hold directories briefly after a
    /// failed extraction.
    pub async fn restore(&self) -> Result<()> {
        let previous = self.layout.previous_dir();
        if !fs::try_exists(&previous).await.unwrap_or(false) {
            return Err(StewardError::NoBackup {
                path: previous.display().to_string(),
            }
            .into());
        }

        warn!("Restoring installation from {:?}", previous);

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;

        loop {
            match self.attempt_restore().await {
                Ok(()) => {
                    info!("Successfully restored previous installation");
                    return Ok(());
                }
                Err(e) if attempts < MAX_ATTEMPTS - 1 => {
                    warn!("Restore attempt {} failed: {}. Retrying...", attempts + 1, e);
                    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
                    attempts += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to restore backup after {MAX_ATTEMPTS} attempts; backup left at {}",
                            previous.display()
                        )
                    });
                }
            }
        }
    }

    async fn attempt_restore(&self) -> Result<()> {
        let active = self.layout.active_dir();
        let previous = self.layout.previous_dir();
        let retired = self.layout.retired_dir();

        // Anything in active/ at this point is the failed new release.
        remove_dir_if_exists(&active).await?;
        fs::rename(&previous, &active)
            .await
            .with_context(|| format!("Failed to move {} to {}", previous.display(), active.display()))?;
        rename_if_exists(&retired, &previous).await?;
        Ok(())
    }

    /// Manual rollback: swap `active/` and `previous/`.
    pub async fn rollback(&self) -> Result<()> {
        let active = self.layout.active_dir();
        let previous = self.layout.previous_dir();
        if !fs::try_exists(&previous).await.unwrap_or(false) {
            return Err(StewardError::NoBackup {
                path: previous.display().to_string(),
            }
            .into());
        }

        let swap = self.layout.staging_dir().join("rollback-swap");
        ensure_dir(&self.layout.staging_dir())?;
        remove_dir_if_exists(&swap).await?;

        let had_active = rename_if_exists(&active, &swap).await?;
        if let Err(e) = fs::rename(&previous, &active).await {
            if had_active {
                // Put the active installation back before reporting.
                fs::rename(&swap, &active).await.with_context(|| {
                    format!("Rollback failed and active installation is parked at {}", swap.display())
                })?;
            }
            return Err(e).with_context(|| {
                format!("Failed to move {} to {}", previous.display(), active.display())
            });
        }
        if had_active {
            fs::rename(&swap, &previous).await.with_context(|| {
                format!("Failed to move {} to {}", swap.display(), previous.display())
            })?;
        }

        info!("Rolled back to previous installation");
        Ok(())
    }

    /// Delete the version-before-previous once a handoff is confirmed.
    pub async fn cleanup_retired(&self) -> Result<bool> {
        let retired = self.layout.retired_dir();
        let removed = remove_dir_if_exists(&retired).await?;
        if removed {
            debug!("Cleaned up retired installation at {:?}", retired);
        }
        Ok(removed)
    }

    pub fn backup_exists(&self) -> bool {
        self.layout.previous_dir().exists()
    }
}

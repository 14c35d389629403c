//! The install state machine.
//!
//! ```text
//! Idle → Staging → Verified → BackedUp → Installed → Restarted → Cleaned
//!            └──────────┴──────────┴──────────┴──────────┴──→ Failed
//! ```
//!
//! [`InstallOrchestrator::run`] drives one install from `Idle` to `Restarted`.
//! `Restarted → Cleaned` happens in the successor process through
//! [`InstallOrchestrator::confirm_startup`], which reads the handoff marker
//! left behind by its predecessor.
//!
//! Failure rules:
//! - before `BackedUp`, the only side effect to undo is the staged file
//! - after `BackedUp`, `previous/` is moved back into `active/`
//! - status flags are left alone so the request is retried, except that
//!   integrity failures (checksum, size, traversal) also record `last_error`

use super::archive::ArchiveExtractor;
use super::backup::BackupManager;
use super::fetch::{ArtifactSource, StagedArtifact};
use super::installation::{HandoffMarker, InstallLayout, InstallationRecord, InstalledVersion};
use super::launcher::{LaunchSpec, ProcessLauncher};
use super::shutdown::Shutdown;
use super::verification::ChecksumVerifier;
use crate::core::{ErrorClass, StewardError, classify};
use crate::metadata::ReleaseDescriptor;
use crate::status::StatusStore;
use crate::utils::fs::{ensure_dir, remove_file_if_exists};
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// States of one install cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallState {
    Idle,
    Staging,
    Verified,
    BackedUp,
    Installed,
    Restarted,
    Cleaned,
    Failed,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Staging => "staging",
            Self::Verified => "verified",
            Self::BackedUp => "backed-up",
            Self::Installed => "installed",
            Self::Restarted => "restarted",
            Self::Cleaned => "cleaned",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of [`InstallOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Final state, `Restarted` on success.
    pub state: InstallState,
    /// Every state entered, in order.
    pub transitions: Vec<InstallState>,
    /// Version that was being installed.
    pub version: String,
    /// Rendered error for `Failed`.
    pub error: Option<String>,
    /// Class of the error for `Failed`.
    pub error_class: Option<ErrorClass>,
    /// Pid of the successor for `Restarted`.
    pub successor_pid: Option<u32>,
}

impl InstallOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == InstallState::Restarted
    }

    /// Last state reached before failing (or the final state).
    pub fn last_reached(&self) -> InstallState {
        self.transitions
            .iter()
            .rev()
            .copied()
            .find(|s| *s != InstallState::Failed)
            .unwrap_or(InstallState::Idle)
    }
}

/// Everything the orchestrator needs to know about this installation.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub layout: InstallLayout,
    pub binary_name: String,
    pub config_path: PathBuf,
}

/// Drives installs for one service.
///
/// The orchestrator owns the install side of the layout: it stages the
/// artifact under `staging/downloads/`, verifies it, retires `active/` into
/// `previous/` through [`BackupManager`], extracts the release into a fresh
/// `active/` and launches the successor. It never reads or clears
/// `update_requested`; deciding *when* to install is the installer's job.
///
/// # Failure Handling
///
/// Every failure ends in [`InstallState::Failed`] with the error classified:
///
/// - **Integrity** (checksum, size, traversal): the staged file is removed and
///   the message is recorded as `last_error` in the status file
/// - **Transient** (network, HTTP status): nothing on disk changes
/// - **Environment** (permissions, missing directories): any completed backup
///   is moved back into `active/`
///
/// A backup is only deleted once the successor confirms its startup.
///
/// # Examples
///
/// ```rust,no_run
/// use steward::config::StewardConfig;
/// use steward::upgrade::UpdateEngine;
/// use steward::upgrade::shutdown::Shutdown;
///
/// # async fn example() -> anyhow::Result<()> {
/// let engine = UpdateEngine::from_config(StewardConfig::load(None).await?)?;
/// let orchestrator = engine.orchestrator();
///
/// if let Some(descriptor) = engine.metadata().cached_descriptor(&engine.config().service).await? {
///     let outcome = orchestrator.run(&descriptor, &Shutdown::never()).await;
///     println!("{} ended in {}", outcome.version, outcome.state);
/// }
/// # Ok(())
/// # }
/// ```
pub struct InstallOrchestrator<A> {
    settings: OrchestratorSettings,
    source: A,
    launcher: Arc<dyn ProcessLauncher>,
    status: StatusStore,
    backups: BackupManager,
}

struct Cycle {
    transitions: Vec<InstallState>,
    version: String,
}

impl Cycle {
    fn enter(&mut self, state: InstallState) {
        info!(state = %state, version = %self.version, "Install state");
        self.transitions.push(state);
    }
}

impl<A: ArtifactSource> InstallOrchestrator<A> {
    /// Creates an orchestrator for the installation described by `settings`.
    ///
    /// # Arguments
    ///
    /// * `settings` - layout, binary name and the config path passed to the successor
    /// * `source` - where artifacts are downloaded from
    /// * `launcher` - starts the successor process after install
    /// * `status` - status file that receives `last_error` and is cleared on handoff
    pub fn new(
        settings: OrchestratorSettings,
        source: A,
        launcher: Arc<dyn ProcessLauncher>,
        status: StatusStore,
    ) -> Self {
        let backups = BackupManager::new(settings.layout.clone());
        Self {
            settings,
            source,
            launcher,
            status,
            backups,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.settings.layout
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    /// Run one install of `descriptor` up to `Restarted` or `Failed`.
    ///
    /// The caller is expected to hold the install lock; the orchestrator
    /// does not take it.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - the release to install, already resolved from trusted metadata
    /// * `shutdown` - cancels the download and aborts before the backup step
    ///
    /// # Returns
    ///
    /// An [`InstallOutcome`] listing every state entered. It is never an
    /// `Err`: failures are reported through `state`, `error` and `error_class`.
    /// On success `successor_pid` holds the launched process id.
    pub async fn run(&self, descriptor: &ReleaseDescriptor, shutdown: &Shutdown) -> InstallOutcome {
        let mut cycle = Cycle {
            transitions: vec![InstallState::Idle],
            version: descriptor.version.clone(),
        };

        let result = self.drive(descriptor, shutdown, &mut cycle).await;
        match result {
            Ok(pid) => InstallOutcome {
                state: InstallState::Restarted,
                transitions: cycle.transitions,
                version: cycle.version,
                error: None,
                error_class: None,
                successor_pid: Some(pid),
            },
            Err(e) => {
                let class = classify(&e);
                error!(version = %cycle.version, class = %class, "Install failed: {e:#}");
                if class.records_last_error() {
                    if let Err(status_err) = self.status.record_error(format!("{e:#}")).await {
                        warn!("Failed to record install error in status file: {status_err:#}");
                    }
                }
                cycle.enter(InstallState::Failed);
                InstallOutcome {
                    state: InstallState::Failed,
                    transitions: cycle.transitions,
                    version: cycle.version,
                    error: Some(format!("{e:#}")),
                    error_class: Some(class),
                    successor_pid: None,
                }
            }
        }
    }

    async fn drive(
        &self,
        descriptor: &ReleaseDescriptor,
        shutdown: &Shutdown,
        cycle: &mut Cycle,
    ) -> Result<u32> {
        let layout = &self.settings.layout;
        let downloads = layout.downloads_dir();
        ensure_dir(&downloads)?;

        cycle.enter(InstallState::Staging);
        let staged = self.stage(descriptor, &downloads, shutdown).await?;

        ChecksumVerifier::verify(&staged.path, &descriptor.sha256()).await?;
        cycle.enter(InstallState::Verified);

        if shutdown.is_triggered() {
            remove_file_if_exists(&staged.path).await?;
            return Err(StewardError::Cancelled {
                operation: "install".to_string(),
            }
            .into());
        }

        let record_path = layout.record_path();
        let old_record = InstallationRecord::load(&record_path).await?;

        if let Err(e) = self.backups.create_backup().await {
            self.undo_partial_backup().await;
            remove_file_if_exists(&staged.path).await?;
            return Err(e);
        }
        cycle.enter(InstallState::BackedUp);

        let installed = match self.install(descriptor, &staged, &old_record).await {
            Ok(installed) => installed,
            Err(e) => {
                self.restore_after_failure(&old_record).await;
                return Err(e);
            }
        };
        cycle.enter(InstallState::Installed);

        let marker = layout.handoff_marker();
        let spec = LaunchSpec::serve(layout.active_binary(&self.settings.binary_name), &self.settings.config_path);
        let launched = async {
            HandoffMarker::new(&installed.version_id).save(&marker).await?;
            self.launcher.launch(&spec)
        }
        .await;

        match launched {
            Ok(pid) => {
                cycle.enter(InstallState::Restarted);
                Ok(pid)
            }
            Err(e) => {
                if let Err(marker_err) = remove_file_if_exists(&marker).await {
                    warn!("Failed to remove handoff marker: {marker_err:#}");
                }
                self.restore_after_failure(&old_record).await;
                Err(e)
            }
        }
    }

    async fn stage(
        &self,
        descriptor: &ReleaseDescriptor,
        downloads: &Path,
        shutdown: &Shutdown,
    ) -> Result<StagedArtifact> {
        let local = downloads.join(staged_file_name(descriptor));
        let staged = self.source.stage(&descriptor.path, &local, shutdown).await?;

        if let Some(expected) = descriptor.size_bytes() {
            if expected != staged.bytes_written {
                remove_file_if_exists(&staged.path).await?;
                return Err(StewardError::SizeMismatch {
                    name: staged_file_name(descriptor),
                    expected,
                    actual: staged.bytes_written,
                }
                .into());
            }
        }
        Ok(staged)
    }

    /// Extract into a temp dir under staging, then rename into `active/`.
    async fn install(
        &self,
        descriptor: &ReleaseDescriptor,
        staged: &StagedArtifact,
        old_record: &InstallationRecord,
    ) -> Result<InstalledVersion> {
        let layout = &self.settings.layout;
        let extract_dir = tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(layout.staging_dir())
            .with_context(|| "Failed to create extraction directory")?;

        let extracted = ArchiveExtractor::extract(&staged.path, extract_dir.path()).await;
        remove_file_if_exists(&staged.path).await?;
        extracted?;

        let binary = extract_dir.path().join(&self.settings.binary_name);
        if !binary.is_file() {
            return Err(StewardError::FileSystemError {
                operation: format!("locate '{}' in release archive", self.settings.binary_name),
                path: staged.path.display().to_string(),
            }
            .into());
        }
        make_executable(&binary).await?;

        let active = layout.active_dir();
        tokio::fs::rename(extract_dir.path(), &active).await.with_context(|| {
            format!("Failed to move {} to {}", extract_dir.path().display(), active.display())
        })?;

        let installed = InstalledVersion::new(&descriptor.version, &active)
            .with_release_date(&descriptor.release_date);
        let mut record = old_record.clone();
        record.promote(installed.clone(), layout.previous_dir());
        record.save(&layout.record_path()).await?;

        info!(version = %installed.version_id, path = %active.display(), "Release installed");
        Ok(installed)
    }

    async fn undo_partial_backup(&self) {
        let layout = &self.settings.layout;
        if !layout.previous_dir().exists() && layout.retired_dir().exists() {
            if let Err(e) = tokio::fs::rename(layout.retired_dir(), layout.previous_dir()).await {
                error!(
                    "Failed to move retired installation back; it remains at {}: {e}",
                    layout.retired_dir().display()
                );
            }
        }
    }

    async fn restore_after_failure(&self, old_record: &InstallationRecord) {
        let layout = &self.settings.layout;
        if !self.backups.backup_exists() {
            // First install: nothing to restore, drop the half install.
            if let Err(e) = crate::utils::fs::remove_dir_if_exists(&layout.active_dir()).await {
                error!("Failed to remove incomplete installation: {e:#}");
            }
        } else if let Err(e) = self.backups.restore().await {
            error!(
                backup = %layout.previous_dir().display(),
                "Automatic restore failed, manual recovery needed: {e:#}"
            );
            return;
        }
        if let Err(e) = old_record.save(&layout.record_path()).await {
            error!("Failed to restore installation record: {e:#}");
        }
    }

    /// Finish a handoff from the successor side.
    ///
    /// Called once by a freshly started process. If `staging/handoff.json`
    /// names the version recorded as current, the status flags are cleared,
    /// `retired/` is deleted and the marker is removed. A marker for another
    /// version is stale and is only removed.
    ///
    /// # Returns
    ///
    /// `Cleaned` when a marker for the current version was processed, `Idle`
    /// otherwise (no marker, or a stale one).
    ///
    /// # Errors
    ///
    /// Fails when the marker or installation record cannot be read, or when
    /// the status file or `retired/` cannot be cleaned up.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use steward::config::StewardConfig;
    /// use steward::upgrade::{InstallState, UpdateEngine};
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let engine = UpdateEngine::from_config(StewardConfig::load(None).await?)?;
    /// if engine.orchestrator().confirm_startup().await? == InstallState::Cleaned {
    ///     println!("Update complete");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn confirm_startup(&self) -> Result<InstallState> {
        let layout = &self.settings.layout;
        let marker_path = layout.handoff_marker();
        let Some(marker) = HandoffMarker::load(&marker_path).await? else {
            return Ok(InstallState::Idle);
        };

        let record = InstallationRecord::load(&layout.record_path()).await?;
        let current = record.current.as_ref().map(|c| c.version_id.as_str());
        if current != Some(marker.version_id.as_str()) {
            warn!(
                marker = %marker.version_id,
                current = current.unwrap_or("<none>"),
                "Handoff marker does not match the installed version, discarding it"
            );
            remove_file_if_exists(&marker_path).await?;
            return Ok(InstallState::Idle);
        }

        self.status.clear().await?;
        self.backups.cleanup_retired().await?;
        remove_file_if_exists(&marker_path).await?;
        info!(version = %marker.version_id, predecessor = marker.predecessor_pid, "Startup confirmed, handoff complete");
        Ok(InstallState::Cleaned)
    }

    /// Manual rollback to the retained previous installation.
    ///
    /// Swaps `active/` and `previous/` and the matching entries of the
    /// installation record, so a second rollback undoes the first. Callers
    /// should hold the install lock.
    ///
    /// # Returns
    ///
    /// The version that is now current.
    ///
    /// # Errors
    ///
    /// Fails when there is no `previous/` installation or a rename fails.
    pub async fn rollback(&self) -> Result<Option<InstalledVersion>> {
        let layout = &self.settings.layout;
        self.backups.rollback().await?;

        let mut record = InstallationRecord::load(&layout.record_path()).await?;
        record.swap(layout.active_dir(), layout.previous_dir());
        record.save(&layout.record_path()).await?;
        Ok(record.current)
    }
}

fn staged_file_name(descriptor: &ReleaseDescriptor) -> String {
    let from_locator = descriptor
        .path
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit('/').next())
        .filter(|name| !name.is_empty() && *name != "..");
    match from_locator {
        Some(name) => name.to_string(),
        None => format!("{}-{}.zip", descriptor.service, descriptor.version),
    }
}

async fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = tokio::fs::metadata(path).await?;
        let mut permissions = metadata.permissions();
        if permissions.mode() & 0o111 == 0 {
            permissions.set_mode(permissions.mode() | 0o755);
            tokio::fs::set_permissions(path, permissions)
                .await
                .with_context(|| format!("Failed to make {} executable", path.display()))?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

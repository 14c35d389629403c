//! Foreground installer: acts on `update_requested`.
//!
//! The installer holds the cross-process install lock for the whole cycle
//! and re-reads the status file *under* the lock, so two processes that both
//! saw the request cannot both install.
//!
//! A release that fails with an integrity or environment error is held: later
//! passes skip it until the cached descriptor changes (new version or new
//! hash) or a fresh request restamps `requested_at`. Transient failures are
//! retried on every pass.

use super::fetch::ArtifactSource;
use super::orchestrator::{InstallOrchestrator, InstallOutcome};
use super::poller::running_version;
use super::shutdown::Shutdown;
use super::version_check::VersionComparator;
use crate::core::{StewardError, find_steward_error};
use crate::metadata::{MetadataClient, TrustRepository};
use crate::status::InstallLock;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one installer pass did.
#[derive(Debug, Clone)]
pub enum InstallerRun {
    /// `update_requested` was not set.
    NotRequested,
    /// Requested, but no descriptor has been cached by a check yet.
    NothingCached,
    /// Requested, but the cached descriptor is not newer.
    UpToDate {
        current: Option<String>,
        candidate: String,
    },
    /// Requested, but this release already failed for the current request.
    Held {
        version: String,
        error: Option<String>,
    },
    /// The orchestrator ran.
    Completed(InstallOutcome),
}

/// A release that failed and must not be retried for the same request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeldRelease {
    version: String,
    sha256: String,
    requested_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl HeldRelease {
    fn matches(&self, version: &str, sha256: &str, requested_at: Option<DateTime<Utc>>) -> bool {
        self.version == version && self.sha256 == sha256 && self.requested_at == requested_at
    }
}

/// Runs the orchestrator when an update has been requested.
pub struct ForegroundInstaller<R, A> {
    service: String,
    metadata: Arc<MetadataClient<R>>,
    orchestrator: InstallOrchestrator<A>,
    comparator: VersionComparator,
    lock_timeout: Duration,
    poll_interval: Duration,
    held: Mutex<Option<HeldRelease>>,
}

impl<R: TrustRepository, A: ArtifactSource> ForegroundInstaller<R, A> {
    pub fn new(
        service: impl Into<String>,
        metadata: Arc<MetadataClient<R>>,
        orchestrator: InstallOrchestrator<A>,
        comparator: VersionComparator,
        lock_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            metadata,
            orchestrator,
            comparator,
            lock_timeout,
            poll_interval,
            held: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &InstallOrchestrator<A> {
        &self.orchestrator
    }

    /// One pass: lock, check the request, install if a newer release is cached.
    pub async fn run_once(&self, shutdown: &Shutdown) -> Result<InstallerRun> {
        let layout = self.orchestrator.layout();
        let _lock = InstallLock::acquire(layout.root(), self.lock_timeout).await?;

        let status = self.orchestrator.status().read().await;
        if !status.update_requested {
            return Ok(InstallerRun::NotRequested);
        }

        let Some(descriptor) = self.metadata.cached_descriptor(&self.service).await? else {
            info!(service = %self.service, "Update requested but no release has been checked yet");
            return Ok(InstallerRun::NothingCached);
        };

        let current = running_version(layout, &self.metadata, &self.service).await?;
        let candidate = descriptor.release_timestamp().to_string();
        let newer = current
            .as_deref()
            .is_some_and(|current| self.comparator.is_newer(current, &candidate));
        if !newer {
            info!(service = %self.service, candidate = %candidate, "Update requested but installed release is current");
            return Ok(InstallerRun::UpToDate {
                current,
                candidate,
            });
        }

        let sha256 = descriptor.sha256();
        {
            let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(held) = held.as_ref() {
                if held.matches(&descriptor.version, &sha256, status.requested_at) {
                    debug!(service = %self.service, version = %held.version, "Release held after failure, waiting for a new request");
                    return Ok(InstallerRun::Held {
                        version: held.version.clone(),
                        error: held.error.clone(),
                    });
                }
            }
        }

        info!(service = %self.service, version = %descriptor.version, "Installing requested update");
        let outcome = self.orchestrator.run(&descriptor, shutdown).await;

        let hold = outcome.error_class.is_some_and(|class| class.waits_for_trigger());
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = hold.then(|| HeldRelease {
            version: descriptor.version.clone(),
            sha256,
            requested_at: status.requested_at,
            error: outcome.error.clone(),
        });
        Ok(InstallerRun::Completed(outcome))
    }

    /// Poll for requests until an install hands off or `shutdown` fires.
    ///
    /// Returns the outcome of a successful handoff, or `None` on shutdown.
    pub async fn watch(&self, mut shutdown: Shutdown) -> Option<InstallOutcome> {
        loop {
            match self.run_once(&shutdown).await {
                Ok(InstallerRun::Completed(outcome)) if outcome.succeeded() => return Some(outcome),
                Ok(InstallerRun::Completed(outcome)) => {
                    let retry = outcome.error_class.is_some_and(|class| !class.waits_for_trigger());
                    warn!(
                        service = %self.service,
                        reached = %outcome.last_reached(),
                        retry,
                        "Install did not complete"
                    );
                }
                Ok(run) => debug!(service = %self.service, ?run, "Installer pass"),
                Err(e) => match find_steward_error(&e) {
                    Some(StewardError::InstallInProgress {
                        ..
                    }) => debug!("Another installer holds the lock"),
                    _ => warn!(service = %self.service, "Installer pass failed: {e:#}"),
                },
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = shutdown.wait() => return None,
            }
        }
    }
}

//! Background check loop.
//!
//! Each tick bootstraps trust if needed, resolves the service's descriptor,
//! compares it to the running version, and sets `update_available` when the
//! descriptor is newer. The poller never installs and never waits on a user.

use super::installation::{InstallLayout, InstallationRecord, InstalledVersion};
use super::shutdown::Shutdown;
use super::version_check::VersionComparator;
use crate::metadata::{MetadataClient, TrustRepository};
use crate::status::StatusStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one check cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Comparison key of the running release, `None` before the first seed.
    pub current: Option<String>,
    /// Release timestamp of the resolved descriptor.
    pub candidate: String,
    /// Whether the descriptor came from the local target cache.
    pub cache_hit: bool,
    pub update_available: bool,
    /// Whether the status file was rewritten.
    pub status_changed: bool,
}

/// Version the installation runs, for comparisons.
///
/// Comes from `installation.json`. When no version has been recorded yet,
/// the cached descriptor seeds the record, so the release present at first
/// start is taken as the running one.
///
/// # Returns
///
/// The comparison key (release timestamp) of the running version, or `None`
/// when nothing is recorded and no descriptor has been cached yet.
///
/// # Errors
///
/// Fails when the installation record or the descriptor cache cannot be
/// read, or the seeded record cannot be written.
pub async fn running_version<R: TrustRepository>(
    layout: &InstallLayout,
    metadata: &MetadataClient<R>,
    service: &str,
) -> Result<Option<String>> {
    let record_path = layout.record_path();
    let mut record = InstallationRecord::load(&record_path).await?;
    if let Some(current) = record.current.as_ref() {
        return Ok(Some(current.comparison_key().to_string()));
    }

    let Some(cached) = metadata.cached_descriptor(service).await? else {
        return Ok(None);
    };
    let seeded =
        InstalledVersion::new(&cached.version, layout.active_dir()).with_release_date(&cached.release_date);
    let key = seeded.comparison_key().to_string();
    info!(service, version = %seeded.version_id, "Seeded running version from cached descriptor");
    record.current = Some(seeded);
    record.save(&record_path).await?;
    Ok(Some(key))
}

/// Periodic metadata checker for one service.
///
/// The poller only ever sets `update_available`; it never clears a flag and
/// never installs. Failures of a tick are transient and retried on the next
/// one.
///
/// # Examples
///
/// ```rust,no_run
/// use steward::config::StewardConfig;
/// use steward::upgrade::UpdateEngine;
///
/// # async fn example() -> anyhow::Result<()> {
/// let engine = UpdateEngine::from_config(StewardConfig::load(None).await?)?;
/// let report = engine.poller().tick().await?;
/// if report.update_available {
///     println!("{} is available", report.candidate);
/// }
/// # Ok(())
/// # }
/// ```
pub struct BackgroundPoller<R> {
    service: String,
    metadata: Arc<MetadataClient<R>>,
    status: StatusStore,
    layout: InstallLayout,
    comparator: VersionComparator,
    interval: Duration,
}

impl<R: TrustRepository> BackgroundPoller<R> {
    pub fn new(
        service: impl Into<String>,
        metadata: Arc<MetadataClient<R>>,
        status: StatusStore,
        layout: InstallLayout,
        comparator: VersionComparator,
        interval: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            metadata,
            status,
            layout,
            comparator,
            interval,
        }
    }

    /// Run one check cycle.
    ///
    /// Bootstraps trust on first use, resolves the service descriptor and
    /// compares its release timestamp with the running version.
    ///
    /// # Returns
    ///
    /// A [`CheckReport`]. `status_changed` is only true when this tick set
    /// `update_available` from 0 to 1.
    ///
    /// # Errors
    ///
    /// Metadata errors (refresh failures, rolled-back or expired roles, a
    /// descriptor missing from the feed) and status file write errors.
    pub async fn tick(&self) -> Result<CheckReport> {
        let service = self.service.as_str();
        self.metadata.bootstrap_trust().await?;

        let current = running_version(&self.layout, &self.metadata, service).await?;
        let resolution = self.metadata.resolve_descriptor(service).await?;
        let descriptor = resolution.descriptor(service)?;
        let candidate = descriptor.release_timestamp().to_string();

        let newer = match current.as_deref() {
            Some(current) => self.comparator.is_newer(current, &candidate),
            None => {
                // Seed on the next tick now that the descriptor is cached.
                debug!(service, "No running version recorded yet");
                false
            }
        };

        let status_changed = if newer {
            info!(service, current = current.as_deref().unwrap_or("<none>"), candidate = %candidate, "Update available");
            self.status.set_update_available(true).await?
        } else {
            debug!(service, candidate = %candidate, "No newer release");
            false
        };

        Ok(CheckReport {
            current,
            candidate,
            cache_hit: resolution.cache_hit,
            update_available: newer,
            status_changed,
        })
    }

    /// Tick every interval until `shutdown` fires. Tick errors are logged and
    /// retried on the next tick.
    pub async fn run(&self, mut shutdown: Shutdown) {
        info!(service = %self.service, interval_secs = self.interval.as_secs(), "Background poller started");
        loop {
            if let Err(e) = self.tick().await {
                warn!(service = %self.service, "Update check failed, retrying next tick: {e:#}");
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = shutdown.wait() => break,
            }
        }
        info!(service = %self.service, "Background poller stopped");
    }
}

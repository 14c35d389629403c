//! Startup fetch of auxiliary tracked services.
//!
//! On `serve` startup every service in `tracked_services` is resolved
//! concurrently; each new release is downloaded, verified, and moved into
//! `<install_root>/tracked/<service>/`. Failures are per-service: one broken
//! descriptor does not stop the others.

use super::fetch::ArtifactSource;
use super::installation::{InstallLayout, InstallationRecord, InstalledVersion};
use super::shutdown::Shutdown;
use super::verification::ChecksumVerifier;
use crate::metadata::{MetadataClient, ReleaseDescriptor, TrustRepository};
use crate::utils::fs::{ensure_dir, remove_dir_if_exists};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-service result of a startup fetch.
#[derive(Debug)]
pub enum TrackedFetch {
    /// A new release was fetched and recorded.
    Fetched(InstalledVersion),
    /// The recorded release is already the published one.
    UpToDate(String),
    Failed(anyhow::Error),
}

/// Fetches releases of the tracked services.
pub struct TrackedServices<R, A> {
    metadata: Arc<MetadataClient<R>>,
    source: A,
    layout: InstallLayout,
}

impl<R: TrustRepository, A: ArtifactSource> TrackedServices<R, A> {
    pub fn new(metadata: Arc<MetadataClient<R>>, source: A, layout: InstallLayout) -> Self {
        Self {
            metadata,
            source,
            layout,
        }
    }

    /// Fetch all `services` concurrently and record the new versions.
    pub async fn fetch_all(&self, services: &[String], shutdown: &Shutdown) -> Vec<(String, TrackedFetch)> {
        if services.is_empty() {
            return Vec::new();
        }
        if let Err(e) = self.metadata.bootstrap_trust().await {
            warn!("Cannot fetch tracked services without trusted root: {e:#}");
            let message = format!("{e:#}");
            return services
                .iter()
                .map(|s| (s.clone(), TrackedFetch::Failed(anyhow::anyhow!("{message}"))))
                .collect();
        }

        let record_path = self.layout.record_path();
        let record = match InstallationRecord::load(&record_path).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to load installation record: {e:#}");
                InstallationRecord::default()
            }
        };

        let futures = services.iter().map(|service| {
            let recorded = record.tracked.get(service).map(|v| v.version_id.clone());
            async move {
                let result = self.fetch_one(service, recorded.as_deref(), shutdown).await;
                (service.clone(), result)
            }
        });
        let results = join_all(futures).await;

        let mut updated = record;
        let mut changed = false;
        for (service, result) in &results {
            match result {
                TrackedFetch::Fetched(version) => {
                    info!(service = %service, version = %version.version_id, "Tracked service fetched");
                    updated.tracked.insert(service.clone(), version.clone());
                    changed = true;
                }
                TrackedFetch::UpToDate(version) => {
                    info!(service = %service, version = %version, "Tracked service up to date");
                }
                TrackedFetch::Failed(e) => warn!(service = %service, "Tracked service fetch failed: {e:#}"),
            }
        }
        if changed {
            if let Err(e) = updated.save(&record_path).await {
                warn!("Failed to record tracked service versions: {e:#}");
            }
        }
        results
    }

    async fn fetch_one(&self, service: &str, recorded: Option<&str>, shutdown: &Shutdown) -> TrackedFetch {
        match self.try_fetch_one(service, recorded, shutdown).await {
            Ok(fetch) => fetch,
            Err(e) => TrackedFetch::Failed(e),
        }
    }

    async fn try_fetch_one(
        &self,
        service: &str,
        recorded: Option<&str>,
        shutdown: &Shutdown,
    ) -> Result<TrackedFetch> {
        let resolution = self.metadata.resolve_descriptor(service).await?;
        let descriptor = resolution.descriptor(service)?;
        let target_dir = self.layout.tracked_dir(service);
        if recorded == Some(descriptor.version.as_str()) && target_dir.exists() {
            return Ok(TrackedFetch::UpToDate(descriptor.version));
        }

        let staging = self.layout.downloads_dir().join(format!("tracked-{service}"));
        remove_dir_if_exists(&staging).await?;
        ensure_dir(&staging)?;

        let result = self.download_verified(&descriptor, &staging, shutdown).await;
        let installed = match result {
            Ok(staged) => self.place(&descriptor, &staged).await,
            Err(e) => Err(e),
        };
        remove_dir_if_exists(&staging).await?;
        installed.map(TrackedFetch::Fetched)
    }

    async fn download_verified(
        &self,
        descriptor: &ReleaseDescriptor,
        staging: &std::path::Path,
        shutdown: &Shutdown,
    ) -> Result<std::path::PathBuf> {
        let name = descriptor
            .path
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty() && *n != "..")
            .map_or_else(|| format!("{}-{}", descriptor.service, descriptor.version), str::to_string);
        let staged = self.source.stage(&descriptor.path, &staging.join(name), shutdown).await?;
        ChecksumVerifier::verify(&staged.path, &descriptor.sha256()).await?;
        Ok(staged.path)
    }

    async fn place(&self, descriptor: &ReleaseDescriptor, staged: &std::path::Path) -> Result<InstalledVersion> {
        let target_dir = self.layout.tracked_dir(&descriptor.service);
        remove_dir_if_exists(&target_dir).await?;
        ensure_dir(&target_dir)?;

        let file_name = staged.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let target = target_dir.join(file_name);
        tokio::fs::rename(staged, &target)
            .await
            .with_context(|| format!("Failed to move {} to {}", staged.display(), target.display()))?;

        Ok(InstalledVersion::new(&descriptor.version, target).with_release_date(&descriptor.release_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeArtifactSource, FakeRepository, descriptor_index};
    use tempfile::TempDir;

    fn publish(repo: &FakeRepository, source: &FakeArtifactSource, service: &str, body: &[u8], sha: &str) {
        let url = format!("https://x/{service}.zip");
        source.publish(&url, body.to_vec());
        repo.publish_target(
            &format!("{service}/{service}-index.json"),
            descriptor_index(service, "2024.01.01.00.00.00", &url, sha).into_bytes(),
        );
    }

    #[tokio::test]
    async fn test_fan_out_is_per_service() {
        let temp = TempDir::new().unwrap();
        let layout = InstallLayout::new(temp.path());
        let repo = FakeRepository::new();
        let source = FakeArtifactSource::new();

        publish(&repo, &source, "good", b"good-bytes", &ChecksumVerifier::sha256_bytes(b"good-bytes"));
        publish(&repo, &source, "bad", b"bad-bytes", &"0".repeat(64));

        let tracked = TrackedServices::new(
            Arc::new(MetadataClient::new(repo, layout.root().join("metadata"))),
            source,
            layout.clone(),
        );
        let services = vec!["good".to_string(), "bad".to_string(), "missing".to_string()];
        let results = tracked.fetch_all(&services, &Shutdown::never()).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].1, TrackedFetch::Fetched(_)));
        assert!(matches!(results[1].1, TrackedFetch::Failed(_)));
        assert!(matches!(results[2].1, TrackedFetch::Failed(_)));
        assert_eq!(std::fs::read(layout.tracked_dir("good").join("good.zip")).unwrap(), b"good-bytes");
        assert!(!layout.tracked_dir("bad").exists());

        let record = InstallationRecord::load(&layout.record_path()).await.unwrap();
        assert_eq!(record.tracked.len(), 1);
        assert_eq!(record.tracked["good"].version_id, "2024.01.01.00.00.00");

        let again = tracked.fetch_all(&services[..1], &Shutdown::never()).await;
        assert!(matches!(again[0].1, TrackedFetch::UpToDate(_)));
    }
}

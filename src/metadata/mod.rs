//! Metadata client: trust bootstrap and release descriptor resolution.
//!
//! [`MetadataClient`] wraps a [`TrustRepository`] and owns the local metadata
//! directory:
//!
//! ```text
//! metadata/
//! ├── root.json                                  trust anchor (trust-on-first-use)
//! └── targets/
//!     └── general-service-index.json             cached descriptor target
//! ```
//!
//! Resolution is refresh → target lookup → cache check. A cached target whose
//! SHA-256 matches the signed target info is returned with `cache_hit = true`
//! and without a download; otherwise the target is fetched, verified against
//! the signed length and hash, and cached.

pub mod descriptor;
pub mod http;
pub mod repository;

pub use descriptor::{ArtifactHashes, ReleaseDescriptor, load_descriptor, parse_descriptor};
pub use http::HttpTrustRepository;
pub use repository::{TargetInfo, TrustRepository};

use crate::constants::ROOT_METADATA_FILE;
use crate::core::StewardError;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of [`MetadataClient::resolve_descriptor`].
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Raw descriptor target bytes.
    pub bytes: Vec<u8>,
    /// Whether the bytes came from the local cache.
    pub cache_hit: bool,
    /// Signed target info the bytes were verified against.
    pub target: TargetInfo,
    /// Where the verified bytes are cached.
    pub cached_path: PathBuf,
}

impl Resolution {
    /// Parse the descriptor entry for `service`.
    pub fn descriptor(&self, service: &str) -> Result<ReleaseDescriptor> {
        parse_descriptor(&self.bytes, service)
    }
}

/// Client over a trusted metadata repository.
#[derive(Debug, Clone)]
pub struct MetadataClient<R> {
    repository: R,
    metadata_dir: PathBuf,
}

impl<R: TrustRepository> MetadataClient<R> {
    pub fn new(repository: R, metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository,
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// `{service}/{service}-index.json`
    pub fn target_path(service: &str) -> String {
        format!("{service}/{service}-index.json")
    }

    /// Local cache location of a service's descriptor target.
    pub fn cached_target_path(&self, service: &str) -> PathBuf {
        self.metadata_dir.join("targets").join(format!("{service}-index.json"))
    }

    /// Ensure a trusted root exists locally.
    ///
    /// Returns `true` when the root was fetched now, `false` when one was
    /// already present. Idempotent.
    pub async fn bootstrap_trust(&self) -> Result<bool> {
        let root_path = self.metadata_dir.join(ROOT_METADATA_FILE);
        if tokio::fs::try_exists(&root_path).await.unwrap_or(false) {
            debug!(path = %root_path.display(), "Trusted root already present");
            return Ok(false);
        }

        let bytes = self
            .repository
            .fetch_initial_root()
            .await
            .context("Failed to fetch initial root metadata")?;
        serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| {
            StewardError::MetadataError {
                message: format!("initial root metadata is not valid JSON: {e}"),
            }
        })?;

        let write_path = root_path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&write_path, &bytes))
            .await
            .context("root write task panicked")??;

        info!(path = %root_path.display(), "Bootstrapped trust on first use");
        Ok(true)
    }

    /// Refresh metadata and return the descriptor target for `service`.
    pub async fn resolve_descriptor(&self, service: &str) -> Result<Resolution> {
        self.repository.refresh().await.context("Failed to refresh metadata")?;

        let target_path = Self::target_path(service);
        let target = self.repository.target_info(&target_path).await?.ok_or_else(|| {
            StewardError::DescriptorNotFound {
                service: service.to_string(),
            }
        })?;

        let cached_path = self.cached_target_path(service);
        if let Some(bytes) = self.cached_bytes_matching(&cached_path, &target).await {
            debug!(service, "Descriptor served from cache");
            return Ok(Resolution {
                bytes,
                cache_hit: true,
                target,
                cached_path,
            });
        }

        let bytes = self
            .repository
            .fetch_target(&target)
            .await
            .with_context(|| format!("Failed to download target {target_path}"))?;

        if bytes.len() as u64 != target.length {
            return Err(StewardError::SizeMismatch {
                name: target_path,
                expected: target.length,
                actual: bytes.len() as u64,
            }
            .into());
        }
        let actual = ChecksumVerifier::sha256_bytes(&bytes);
        if actual != target.sha256 {
            return Err(StewardError::ChecksumMismatch {
                name: target_path,
                expected: target.sha256.clone(),
                actual,
            }
            .into());
        }

        let write_path = cached_path.clone();
        let to_write = bytes.clone();
        tokio::task::spawn_blocking(move || atomic_write(&write_path, &to_write))
            .await
            .context("target cache write task panicked")??;

        info!(service, sha256 = %target.sha256, "Downloaded new descriptor");
        Ok(Resolution {
            bytes,
            cache_hit: false,
            target,
            cached_path,
        })
    }

    /// The last verified descriptor for `service`, if one is cached.
    pub async fn cached_descriptor(&self, service: &str) -> Result<Option<ReleaseDescriptor>> {
        let path = self.cached_target_path(service);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        load_descriptor(&path, service).await.map(Some)
    }

    async fn cached_bytes_matching(&self, path: &Path, target: &TargetInfo) -> Option<Vec<u8>> {
        let bytes = tokio::fs::read(path).await.ok()?;
        (bytes.len() as u64 == target.length
            && ChecksumVerifier::sha256_bytes(&bytes) == target.sha256)
            .then_some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorClass, classify};
    use crate::test_utils::{FakeRepository, descriptor_index};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let repo = FakeRepository::new();
        let client = MetadataClient::new(repo.clone(), temp.path());

        assert!(client.bootstrap_trust().await.unwrap());
        assert!(!client.bootstrap_trust().await.unwrap());
        assert_eq!(repo.root_fetches(), 1);
        assert!(temp.path().join("root.json").exists());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_root() {
        let temp = TempDir::new().unwrap();
        let repo = FakeRepository::new().with_root(b"not json".to_vec());
        let client = MetadataClient::new(repo, temp.path());

        assert!(client.bootstrap_trust().await.is_err());
        assert!(!temp.path().join("root.json").exists());
    }

    #[tokio::test]
    async fn test_resolve_downloads_then_hits_cache() {
        let temp = TempDir::new().unwrap();
        let repo = FakeRepository::new();
        let index = descriptor_index("svc", "2024.01.01.00.00.00", "https://x/svc.zip", &"a".repeat(64));
        repo.publish_target("svc/svc-index.json", index.clone().into_bytes());
        let client = MetadataClient::new(repo.clone(), temp.path());

        let first = client.resolve_descriptor("svc").await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.bytes, index.as_bytes());
        assert!(client.cached_target_path("svc").exists());

        let second = client.resolve_descriptor("svc").await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(repo.target_fetches(), 1);
        assert_eq!(second.descriptor("svc").unwrap().version, "2024.01.01.00.00.00");
    }

    #[tokio::test]
    async fn test_resolve_redownloads_when_target_changes() {
        let temp = TempDir::new().unwrap();
        let repo = FakeRepository::new();
        let client = MetadataClient::new(repo.clone(), temp.path());

        repo.publish_target(
            "svc/svc-index.json",
            descriptor_index("svc", "2024.01.01.00.00.00", "u", &"a".repeat(64)).into_bytes(),
        );
        client.resolve_descriptor("svc").await.unwrap();

        repo.publish_target(
            "svc/svc-index.json",
            descriptor_index("svc", "2024.02.01.00.00.00", "u", &"b".repeat(64)).into_bytes(),
        );
        let resolution = client.resolve_descriptor("svc").await.unwrap();
        assert!(!resolution.cache_hit);
        assert_eq!(
            client.cached_descriptor("svc").await.unwrap().unwrap().version,
            "2024.02.01.00.00.00"
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_target() {
        let temp = TempDir::new().unwrap();
        let client = MetadataClient::new(FakeRepository::new(), temp.path());

        let err = client.resolve_descriptor("svc").await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_resolve_rejects_tampered_target() {
        let temp = TempDir::new().unwrap();
        let repo = FakeRepository::new();
        repo.publish_target("svc/svc-index.json", b"{}".to_vec());
        repo.tamper_target("svc/svc-index.json", b"{!".to_vec());
        let client = MetadataClient::new(repo, temp.path());

        let err = client.resolve_descriptor("svc").await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Integrity);
        assert!(!client.cached_target_path("svc").exists());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_transient() {
        let temp = TempDir::new().unwrap();
        let repo = FakeRepository::new();
        repo.fail_refresh(true);
        let client = MetadataClient::new(repo, temp.path());

        let err = client.resolve_descriptor("svc").await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Transient);
    }
}

//! HTTP-backed [`TrustRepository`].
//!
//! Remote layout (consistent snapshots):
//!
//! ```text
//! {metadata_url}/1.root.json          initial root, fetched once
//! {metadata_url}/targets.json         targets role
//! {targets_url}/{dir}/{sha256}.{name} target files, prefixed with their hash
//! ```
//!
//! The refreshed targets role is kept as `targets.json` in the metadata
//! directory. A refresh is refused when no trusted root exists yet, when the
//! remote role has expired, or when its version goes backwards.

use super::repository::{TargetInfo, TrustRepository};
use crate::constants::{INITIAL_ROOT_REMOTE, ROOT_METADATA_FILE};
use crate::core::StewardError;
use crate::utils::fs::atomic_write;
use crate::utils::http::get_bytes;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const TARGETS_ROLE_FILE: &str = "targets.json";

#[derive(Debug, Deserialize)]
struct SignedEnvelope {
    signed: TargetsRole,
}

#[derive(Debug, Deserialize)]
struct TargetsRole {
    #[serde(default)]
    version: u64,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(default)]
    targets: BTreeMap<String, TargetEntry>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    length: u64,
    hashes: BTreeMap<String, String>,
}

/// Metadata repository reached over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTrustRepository {
    client: reqwest::Client,
    metadata_url: String,
    targets_url: String,
    metadata_dir: PathBuf,
    timeout: Duration,
}

impl HttpTrustRepository {
    pub fn new(
        client: reqwest::Client,
        metadata_url: impl Into<String>,
        targets_url: impl Into<String>,
        metadata_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            metadata_url: metadata_url.into().trim_end_matches('/').to_string(),
            targets_url: targets_url.into().trim_end_matches('/').to_string(),
            metadata_dir: metadata_dir.into(),
            timeout,
        }
    }

    fn role_path(&self) -> PathBuf {
        self.metadata_dir.join(TARGETS_ROLE_FILE)
    }

    async fn load_role(&self) -> Result<Option<TargetsRole>> {
        match tokio::fs::read(self.role_path()).await {
            Ok(bytes) => {
                let envelope: SignedEnvelope =
                    serde_json::from_slice(&bytes).map_err(|e| StewardError::MetadataError {
                        message: format!("stored targets metadata is invalid: {e}"),
                    })?;
                Ok(Some(envelope.signed))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read stored targets metadata"),
        }
    }

    /// URL of a target file under consistent snapshots.
    pub fn target_url(&self, info: &TargetInfo) -> String {
        match info.path.rsplit_once('/') {
            Some((dir, name)) => format!("{}/{dir}/{}.{name}", self.targets_url, info.sha256),
            None => format!("{}/{}.{}", self.targets_url, info.sha256, info.path),
        }
    }
}

impl TrustRepository for HttpTrustRepository {
    async fn fetch_initial_root(&self) -> Result<Vec<u8>> {
        let url = format!("{}/{INITIAL_ROOT_REMOTE}", self.metadata_url);
        get_bytes(&self.client, &url, "root metadata download", self.timeout).await
    }

    async fn refresh(&self) -> Result<()> {
        if !tokio::fs::try_exists(self.metadata_dir.join(ROOT_METADATA_FILE)).await.unwrap_or(false)
        {
            return Err(StewardError::MetadataError {
                message: "no trusted root metadata; bootstrap trust first".to_string(),
            }
            .into());
        }

        let url = format!("{}/{TARGETS_ROLE_FILE}", self.metadata_url);
        let bytes = get_bytes(&self.client, &url, "targets metadata refresh", self.timeout).await?;
        let envelope: SignedEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| StewardError::MetadataError {
                message: format!("targets metadata is invalid: {e}"),
            })?;

        if let Some(expires) = envelope.signed.expires {
            if expires < Utc::now() {
                return Err(StewardError::MetadataError {
                    message: format!("targets metadata expired at {expires}"),
                }
                .into());
            }
        }

        let stored_version = self.load_role().await?.map(|role| role.version).unwrap_or(0);
        if envelope.signed.version < stored_version {
            return Err(StewardError::MetadataError {
                message: format!(
                    "targets metadata version went backwards ({} < {stored_version})",
                    envelope.signed.version
                ),
            }
            .into());
        }

        let path = self.role_path();
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
            .await
            .context("metadata write task panicked")??;
        info!(version = envelope.signed.version, "Refreshed targets metadata");
        Ok(())
    }

    async fn target_info(&self, target_path: &str) -> Result<Option<TargetInfo>> {
        let Some(role) = self.load_role().await? else {
            return Err(StewardError::MetadataError {
                message: "targets metadata has not been refreshed".to_string(),
            }
            .into());
        };

        let Some(entry) = role.targets.get(target_path) else {
            debug!(target_path, "Target not listed");
            return Ok(None);
        };
        let sha256 = entry.hashes.get("sha256").ok_or_else(|| StewardError::MetadataError {
            message: format!("target '{target_path}' has no sha256 hash"),
        })?;

        Ok(Some(TargetInfo {
            path: target_path.to_string(),
            length: entry.length,
            sha256: sha256.to_ascii_lowercase(),
        }))
    }

    async fn fetch_target(&self, info: &TargetInfo) -> Result<Vec<u8>> {
        let url = self.target_url(info);
        get_bytes(&self.client, &url, "target download", self.timeout).await
    }
}

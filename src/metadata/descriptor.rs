//! Release descriptors: the `{service}-index.json` target.
//!
//! The target is a JSON object keyed by service name:
//!
//! ```json
//! {
//!   "general-service": {
//!     "bytes": "1048576",
//!     "path": "https://storage.example.com/releases/general-service-2024.01.01.00.00.00.zip",
//!     "hashes": {"sha256": "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"},
//!     "version": "2024.01.01.00.00.00",
//!     "release-date": "2024.01.01.00.00.00"
//!   }
//! }
//! ```

use crate::core::StewardError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Hashes published for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHashes {
    pub sha256: String,
}

/// One service's release as published in the index target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Service the descriptor was keyed under.
    #[serde(skip)]
    pub service: String,

    /// Artifact size in bytes, published as a decimal string.
    #[serde(default)]
    pub bytes: String,

    /// Remote locator of the artifact: absolute URL or path under the artifact base URL.
    pub path: String,

    pub hashes: ArtifactHashes,

    /// Opaque version label; names the installed version.
    pub version: String,

    /// Release timestamp in the configured version layout.
    #[serde(rename = "release-date", default)]
    pub release_date: String,
}

impl ReleaseDescriptor {
    /// Declared artifact size, when the descriptor carries a parsable one.
    pub fn size_bytes(&self) -> Option<u64> {
        self.bytes.trim().parse().ok()
    }

    /// Expected artifact hash in lowercase hex.
    pub fn sha256(&self) -> String {
        self.hashes.sha256.to_ascii_lowercase()
    }

    /// Timestamp used for newer-than comparisons: the release date, or the
    /// version label when no release date is published.
    pub fn release_timestamp(&self) -> &str {
        if self.release_date.trim().is_empty() { &self.version } else { &self.release_date }
    }

    fn validate(&self) -> Result<(), StewardError> {
        let invalid = |reason: String| StewardError::DescriptorParseError {
            service: self.service.clone(),
            reason,
        };
        let hash = &self.hashes.sha256;
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid(format!("sha256 '{hash}' is not 64 hex characters")));
        }
        if self.path.trim().is_empty() {
            return Err(invalid("artifact path is empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("version is empty".to_string()));
        }
        if !self.bytes.trim().is_empty() && self.size_bytes().is_none() {
            return Err(invalid(format!("bytes '{}' is not a number", self.bytes)));
        }
        Ok(())
    }
}

/// Parse index bytes and pick the entry for `service`.
pub fn parse_descriptor(bytes: &[u8], service: &str) -> Result<ReleaseDescriptor> {
    let mut entries: BTreeMap<String, ReleaseDescriptor> =
        serde_json::from_slice(bytes).map_err(|e| StewardError::DescriptorParseError {
            service: service.to_string(),
            reason: e.to_string(),
        })?;

    let mut descriptor = entries.remove(service).ok_or_else(|| {
        StewardError::DescriptorNotFound {
            service: service.to_string(),
        }
    })?;
    descriptor.service = service.to_string();
    descriptor.validate()?;
    Ok(descriptor)
}

/// Read the index file at `path`, then parse it.
pub async fn load_descriptor(path: &Path, service: &str) -> Result<ReleaseDescriptor> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read descriptor file: {}", path.display()))?;
    parse_descriptor(&bytes, service)
        .with_context(|| format!("Failed to parse descriptor file: {}", path.display()))
}

//! The seam to the signed-metadata protocol.
//!
//! Signature checking of root, timestamp, snapshot and targets roles belongs
//! to the trust library behind this trait; steward only consumes its three
//! operations plus the one-time fetch of the initial root.

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Signed description of a target file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Target path, e.g. `general-service/general-service-index.json`.
    pub path: String,
    /// Length in bytes.
    pub length: u64,
    /// Lowercase hex SHA-256.
    pub sha256: String,
}

/// Operations of a trusted metadata repository.
pub trait TrustRepository: Send + Sync {
    /// Fetch the first root metadata version for trust-on-first-use.
    fn fetch_initial_root(&self) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;

    /// Refresh top-level metadata.
    fn refresh(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Resolve a target; `None` when the repository does not list it.
    fn target_info(
        &self,
        target_path: &str,
    ) -> impl Future<Output = anyhow::Result<Option<TargetInfo>>> + Send;

    /// Download a target's bytes. Callers verify them against `info`.
    fn fetch_target(&self, info: &TargetInfo) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

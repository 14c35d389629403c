//! Integrity verification of staged artifacts.
//!
//! Hashes are computed by streaming the file through SHA-256 in fixed-size
//! chunks, so artifacts are never held in memory whole. Digests are compared
//! as lowercase hex. A mismatch is a hard stop: [`ChecksumVerifier::verify`]
//! deletes the staged file before returning
//! [`StewardError::ChecksumMismatch`].

use crate::constants::HASH_BUFFER_SIZE;
use crate::core::StewardError;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// SHA-256 computation and verification.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Lowercase hex SHA-256 of an in-memory buffer.
    pub fn sha256_bytes(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Stream a file through SHA-256 and return the lowercase hex digest.
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {:?}", file_path);

        let mut file = tokio::fs::File::open(file_path)
            .await
            .with_context(|| format!("Failed to open file: {file_path:?}"))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .with_context(|| format!("Failed to read file: {file_path:?}"))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Verify `file_path` against `expected_sha256`.
    ///
    /// On mismatch the file is removed and
    /// [`StewardError::ChecksumMismatch`] is returned.
    pub async fn verify(file_path: &Path, expected_sha256: &str) -> Result<()> {
        info!("Verifying checksum for: {:?}", file_path);

        let expected = expected_sha256.trim().to_ascii_lowercase();
        let actual = Self::compute_sha256(file_path).await?;

        if actual != expected {
            warn!(expected = %expected, actual = %actual, "Checksum mismatch, discarding staged file");
            if let Err(e) = tokio::fs::remove_file(file_path).await {
                warn!("Failed to remove staged file {:?}: {}", file_path, e);
            }
            let name = file_path
                .file_name()
                .map_or_else(|| file_path.display().to_string(), |n| n.to_string_lossy().into_owned());
            return Err(StewardError::ChecksumMismatch {
                name,
                expected,
                actual,
            }
            .into());
        }

        info!("Checksum verification successful");
        Ok(())
    }
}

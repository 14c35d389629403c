//! Durable update flags shared between processes.
//!
//! The status file is the only coordination channel between the background
//! poller, the trigger surface (API or `steward request`), and the installer:
//!
//! ```json
//! {"update_available": 1, "update_requested": 0}
//! ```
//!
//! Flags are written as `0`/`1`. An optional `last_error` records the most
//! recent integrity failure, and `requested_at` stamps each explicit request
//! so the installer can tell a fresh request from one it already acted on. Reads never fail: a missing file, an unreadable
//! file, or malformed JSON all read as the all-zero status.
//!
//! Writes replace the whole file atomically. Read-modify-write cycles made
//! through [`StatusStore::update`] additionally hold an advisory lock on a
//! sibling `.lock` file, so concurrent writers in different processes do not
//! lose each other's flags.

pub mod lock;

pub use lock::InstallLock;

use crate::utils::fs::atomic_write_json;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The persisted update flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    /// Set by the poller when a newer descriptor is cached.
    #[serde(with = "flag", default)]
    pub update_available: bool,

    /// Set by the trigger surface; consumed by the installer.
    #[serde(with = "flag", default)]
    pub update_requested: bool,

    /// Last integrity failure (hash mismatch, archive traversal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the current request was made. Every request restamps it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

impl UpdateStatus {
    /// Parse status bytes, falling back to all-zero on malformed input.
    pub fn parse_lenient(bytes: &[u8], origin: &Path) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(status) => status,
            Err(e) => {
                warn!(path = %origin.display(), error = %e, "Malformed status file, treating as all-zero");
                Self::default()
            }
        }
    }
}

/// Serialize booleans as `0`/`1`; accept numbers or booleans on read.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Int(i64),
            Float(f64),
            Bool(bool),
        }

        Ok(match Flag::deserialize(deserializer)? {
            Flag::Int(n) => n != 0,
            Flag::Float(n) => n != 0.0,
            Flag::Bool(b) => b,
        })
    }
}

/// Response of the trigger surface.
///
/// Serializes as `{"success":true}` or `{"success":false,"error":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl From<&anyhow::Result<()>> for TriggerResponse {
    fn from(result: &anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failure(format!("{e:#}")),
        }
    }
}

/// File-backed store for [`UpdateStatus`].
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let name = self.path.file_name().map(|n| n.to_string_lossy().into_owned());
        self.path.with_file_name(format!("{}.lock", name.unwrap_or_else(|| "status".to_string())))
    }

    /// Read the current flags. Never fails.
    pub async fn read(&self) -> UpdateStatus {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => UpdateStatus::parse_lenient(&bytes, &self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No status file yet");
                UpdateStatus::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read status file, treating as all-zero");
                UpdateStatus::default()
            }
        }
    }

    /// Replace the whole status file.
    pub async fn write(&self, status: &UpdateStatus) -> Result<()> {
        let path = self.path.clone();
        let status = status.clone();
        tokio::task::spawn_blocking(move || atomic_write_json(&path, &status))
            .await
            .context("status write task panicked")?
    }

    /// Apply `mutate` under the status lock. The file is rewritten only when
    /// the status actually changed; returns whether it was.
    pub async fn update<F>(&self, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut UpdateStatus) + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path();

        tokio::task::spawn_blocking(move || -> Result<bool> {
            if let Some(parent) = lock_path.parent() {
                crate::utils::fs::ensure_dir(parent)?;
            }
            let lock_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)
                .with_context(|| format!("Failed to open status lock: {}", lock_path.display()))?;
            lock_file
                .lock_exclusive()
                .with_context(|| format!("Failed to lock status file: {}", lock_path.display()))?;

            let current = match std::fs::read(&path) {
                Ok(bytes) => UpdateStatus::parse_lenient(&bytes, &path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => UpdateStatus::default(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read status file, treating as all-zero");
                    UpdateStatus::default()
                }
            };

            let mut next = current.clone();
            mutate(&mut next);
            if next == current && path.exists() {
                return Ok(false);
            }
            atomic_write_json(&path, &next)?;
            debug!(path = %path.display(), status = ?next, "Status updated");
            Ok(true)
        })
        .await
        .context("status update task panicked")?
    }

    /// Mark that a newer descriptor is available.
    pub async fn set_update_available(&self, available: bool) -> Result<bool> {
        self.update(move |s| s.update_available = available).await
    }

    /// The trigger: ask the installer to run.
    ///
    /// Repeating a request while one is pending restamps `requested_at`,
    /// which lets the installer retry a release it gave up on.
    pub async fn request_update(&self) -> Result<bool> {
        let now = Utc::now();
        self.update(move |s| {
            s.update_requested = true;
            s.requested_at = Some(now);
        })
        .await
    }

    /// Clear both flags and any recorded error after a completed cycle.
    pub async fn clear(&self) -> Result<bool> {
        self.update(|s| *s = UpdateStatus::default()).await
    }

    /// Record an integrity failure without touching the flags.
    pub async fn record_error(&self, message: impl Into<String>) -> Result<bool> {
        let message = message.into();
        self.update(move |s| s.last_error = Some(message)).await
    }
}

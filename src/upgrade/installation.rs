//! On-disk installation layout and the record of installed versions.
//!
//! ```text
//! <install_root>/
//! ├── active/             current installation (binary + adjacent assets)
//! ├── previous/           one rollback generation
//! ├── retired/            version-before-previous, deleted after handoff
//! ├── staging/            extraction temp dirs, handoff marker
//! │   └── downloads/      downloaded archives, named by the server if it asks
//! └── installation.json   InstallationRecord
//! ```

use crate::constants::{DOWNLOADS_DIR, HANDOFF_MARKER_FILE, INSTALLATION_RECORD_FILE};
use crate::utils::fs::atomic_write_json;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Paths of one installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_dir(&self) -> PathBuf {
        self.root.join("active")
    }

    pub fn previous_dir(&self) -> PathBuf {
        self.root.join("previous")
    }

    pub fn retired_dir(&self) -> PathBuf {
        self.root.join("retired")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Where artifacts are downloaded. Kept apart from the marker files in
    /// `staging/` so a server-chosen file name cannot replace them.
    pub fn downloads_dir(&self) -> PathBuf {
        self.staging_dir().join(DOWNLOADS_DIR)
    }

    pub fn tracked_dir(&self, service: &str) -> PathBuf {
        self.root.join("tracked").join(service)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(INSTALLATION_RECORD_FILE)
    }

    pub fn handoff_marker(&self) -> PathBuf {
        self.staging_dir().join(HANDOFF_MARKER_FILE)
    }

    /// Path of the service binary inside the active slot.
    pub fn active_binary(&self, binary_name: &str) -> PathBuf {
        self.active_dir().join(binary_name)
    }
}

/// One installed release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub version_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    pub install_path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

impl InstalledVersion {
    pub fn new(version_id: impl Into<String>, install_path: impl Into<PathBuf>) -> Self {
        Self {
            version_id: version_id.into(),
            release_date: None,
            install_path: install_path.into(),
            installed_at: Utc::now(),
        }
    }

    pub fn with_release_date(mut self, release_date: impl Into<String>) -> Self {
        let release_date = release_date.into();
        self.release_date = (!release_date.is_empty()).then_some(release_date);
        self
    }

    /// Timestamp used for version comparison.
    pub fn comparison_key(&self) -> &str {
        self.release_date.as_deref().unwrap_or(&self.version_id)
    }
}

/// Persisted `installation.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<InstalledVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<InstalledVersion>,
    /// Versions fetched for auxiliary tracked services, keyed by service.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tracked: BTreeMap<String, InstalledVersion>,
}

impl InstallationRecord {
    /// Load the record; a missing file is an empty record. A corrupt record
    /// is logged and treated as empty so the next install can rewrite it.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read installation record: {}", path.display()));
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Installation record is malformed, ignoring it");
                Ok(Self::default())
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        let record = self.clone();
        tokio::task::spawn_blocking(move || atomic_write_json(&path, &record))
            .await
            .with_context(|| "Installation record write task panicked")?
    }

    /// Promote `installed` to current, demoting the old current to previous.
    pub fn promote(&mut self, installed: InstalledVersion, previous_path: PathBuf) {
        self.previous = self.current.take().map(|mut old| {
            old.install_path = previous_path;
            old
        });
        self.current = Some(installed);
    }

    /// Swap current and previous after a restore or manual rollback.
    pub fn swap(&mut self, active_path: PathBuf, previous_path: PathBuf) {
        std::mem::swap(&mut self.current, &mut self.previous);
        if let Some(current) = self.current.as_mut() {
            current.install_path = active_path;
        }
        if let Some(previous) = self.previous.as_mut() {
            previous.install_path = previous_path;
        }
    }
}

/// Marker left in staging for the successor process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffMarker {
    pub version_id: String,
    pub written_at: DateTime<Utc>,
    pub predecessor_pid: u32,
}

impl HandoffMarker {
    pub fn new(version_id: impl Into<String>) -> Self {
        Self {
            version_id: version_id.into(),
            written_at: Utc::now(),
            predecessor_pid: std::process::id(),
        }
    }

    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(marker) => Ok(Some(marker)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Handoff marker is malformed, ignoring it");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read handoff marker: {}", path.display()))
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        let marker = self.clone();
        tokio::task::spawn_blocking(move || atomic_write_json(&path, &marker))
            .await
            .with_context(|| "Handoff marker write task panicked")?
    }
}

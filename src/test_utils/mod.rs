//! Test utilities for steward
//!
//! In-memory fakes for the external seams (trust repository, artifact store,
//! process launcher) plus helpers to build release archives and seed an
//! installation root.
//!
//! # Example
//!
//! ```rust,no_run
//! use steward::test_utils::{FakeRepository, descriptor_index};
//!
//! let repo = FakeRepository::new();
//! repo.publish_target(
//!     "svc/svc-index.json",
//!     descriptor_index("svc", "2024.01.01.00.00.00", "https://x/svc.zip", &"a".repeat(64))
//!         .into_bytes(),
//! );
//! ```

use crate::core::StewardError;
use crate::metadata::{TargetInfo, TrustRepository};
use crate::upgrade::fetch::{ArtifactSource, StagedArtifact};
use crate::upgrade::installation::{InstallLayout, InstallationRecord, InstalledVersion};
use crate::upgrade::launcher::{LaunchSpec, ProcessLauncher};
use crate::upgrade::shutdown::Shutdown;
use crate::upgrade::verification::ChecksumVerifier;
use anyhow::Result;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use zip::write::SimpleFileOptions;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Initializes the tracing subscriber once, however often it is called. An
/// explicit `level` wins; otherwise `RUST_LOG` is used if set, and without
/// either nothing is logged.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// Descriptor index JSON with one entry whose release date equals `version`.
/// The size is left unpublished.
pub fn descriptor_index(service: &str, version: &str, path: &str, sha256: &str) -> String {
    serde_json::json!({
        service: {
            "bytes": "",
            "path": path,
            "hashes": { "sha256": sha256 },
            "version": version,
            "release-date": version,
        }
    })
    .to_string()
}

/// Like [`descriptor_index`] but with the artifact size filled in.
pub fn descriptor_index_sized(service: &str, version: &str, path: &str, artifact: &[u8]) -> String {
    serde_json::json!({
        service: {
            "bytes": artifact.len().to_string(),
            "path": path,
            "hashes": { "sha256": ChecksumVerifier::sha256_bytes(artifact) },
            "version": version,
            "release-date": version,
        }
    })
    .to_string()
}

#[derive(Debug, Default)]
struct RepositoryState {
    root: Vec<u8>,
    signed: HashMap<String, TargetInfo>,
    served: HashMap<String, Vec<u8>>,
    fail_refresh: bool,
}

/// In-memory [`TrustRepository`]. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeRepository {
    state: Arc<Mutex<RepositoryState>>,
    root_fetches: Arc<AtomicUsize>,
    target_fetches: Arc<AtomicUsize>,
}

impl Default for FakeRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRepository {
    pub fn new() -> Self {
        let state = RepositoryState {
            root: br#"{"signed":{"_type":"root","version":1}}"#.to_vec(),
            ..RepositoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            root_fetches: Arc::new(AtomicUsize::new(0)),
            target_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_root(self, root: Vec<u8>) -> Self {
        self.state.lock().unwrap().root = root;
        self
    }

    /// Sign and serve `bytes` as target `path`.
    pub fn publish_target(&self, path: &str, bytes: Vec<u8>) {
        let info = TargetInfo {
            path: path.to_string(),
            length: bytes.len() as u64,
            sha256: ChecksumVerifier::sha256_bytes(&bytes),
        };
        let mut state = self.state.lock().unwrap();
        state.signed.insert(path.to_string(), info);
        state.served.insert(path.to_string(), bytes);
    }

    /// Serve different bytes for `path` while keeping its signed info.
    pub fn tamper_target(&self, path: &str, bytes: Vec<u8>) {
        self.state.lock().unwrap().served.insert(path.to_string(), bytes);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.state.lock().unwrap().fail_refresh = fail;
    }

    pub fn root_fetches(&self) -> usize {
        self.root_fetches.load(Ordering::SeqCst)
    }

    pub fn target_fetches(&self) -> usize {
        self.target_fetches.load(Ordering::SeqCst)
    }
}

impl TrustRepository for FakeRepository {
    async fn fetch_initial_root(&self) -> Result<Vec<u8>> {
        self.root_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().root.clone())
    }

    async fn refresh(&self) -> Result<()> {
        if self.state.lock().unwrap().fail_refresh {
            return Err(StewardError::MetadataError {
                message: "refresh failed (fake)".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn target_info(&self, target_path: &str) -> Result<Option<TargetInfo>> {
        Ok(self.state.lock().unwrap().signed.get(target_path).cloned())
    }

    async fn fetch_target(&self, info: &TargetInfo) -> Result<Vec<u8>> {
        self.target_fetches.fetch_add(1, Ordering::SeqCst);
        let served = self.state.lock().unwrap().served.get(&info.path).cloned();
        served.ok_or_else(|| {
            StewardError::HttpStatus {
                url: info.path.clone(),
                status: 404,
            }
            .into()
        })
    }
}

/// In-memory [`ArtifactSource`] keyed by locator. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeArtifactSource {
    artifacts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    downloads: Arc<AtomicUsize>,
    staged_paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, locator: &str, bytes: Vec<u8>) {
        self.artifacts.lock().unwrap().insert(locator.to_string(), bytes);
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Local paths passed to every `stage` call.
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged_paths.lock().unwrap().clone()
    }
}

impl ArtifactSource for FakeArtifactSource {
    async fn stage(&self, locator: &str, local_path: &Path, shutdown: &Shutdown) -> Result<StagedArtifact> {
        if shutdown.is_triggered() {
            return Err(StewardError::Cancelled {
                operation: "artifact download".to_string(),
            }
            .into());
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.staged_paths.lock().unwrap().push(local_path.to_path_buf());
        let bytes = self.artifacts.lock().unwrap().get(locator).cloned();
        let Some(bytes) = bytes else {
            return Err(StewardError::HttpStatus {
                url: locator.to_string(),
                status: 404,
            }
            .into());
        };
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;
        Ok(StagedArtifact {
            path: local_path.to_path_buf(),
            bytes_written: bytes.len() as u64,
        })
    }
}

/// [`ProcessLauncher`] that records launches instead of spawning.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<LaunchSpec>>,
    fail_next: AtomicBool,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next launch fail as a spawn error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StewardError::SpawnFailed {
                binary: spec.binary.display().to_string(),
                reason: "launch refused (fake)".to_string(),
            }
            .into());
        }
        self.launches.lock().unwrap().push(spec.clone());
        Ok(4242)
    }
}

/// Zip `entries` (name, content) in memory; files get mode 0755.
pub fn build_zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        let options = SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file(*name, options)?;
        writer.write_all(content)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Write a zip of `entries` to `path`.
pub fn build_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    std::fs::write(path, build_zip_bytes(entries)?)?;
    Ok(())
}

/// Create `active/<binary>` with `content` and record `version` as current.
pub async fn seed_installation(
    root: &Path,
    binary: &str,
    content: &[u8],
    version: &str,
) -> Result<InstallLayout> {
    let layout = InstallLayout::new(root);
    tokio::fs::create_dir_all(layout.active_dir()).await?;
    tokio::fs::write(layout.active_binary(binary), content).await?;

    let mut record = InstallationRecord::default();
    record.promote(
        InstalledVersion::new(version, layout.active_dir()).with_release_date(version),
        layout.previous_dir(),
    );
    record.save(&layout.record_path()).await?;
    Ok(layout)
}

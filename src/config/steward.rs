//! The steward configuration file.
//!
//! A single TOML file describes one installation: which service it runs,
//! where the installation root and metadata live, which feed to poll, and
//! how to authenticate against the artifact store.
//!
//! ```toml
//! service = "general-service"
//! tracked_services = ["general-service-ui"]
//! install_root = "/opt/general-service"
//! metadata_url = "https://updates.example.com/metadata"
//! targets_url = "https://updates.example.com/targets"
//!
//! [credentials]
//! type = "token_file"
//! path = "/etc/general-service/token"
//!
//! [upgrade]
//! check_interval = 60
//! ```
//!
//! Relative paths are resolved against the directory that contains the
//! configuration file, and `~`/`$VAR` references are expanded.

use super::credentials::CredentialSource;
use crate::core::StewardError;
use crate::upgrade::config::UpgradeConfig;
use crate::utils::resolve_path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration for one self-updating installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardConfig {
    /// Service name; selects the `{service}/{service}-index.json` target.
    pub service: String,

    /// Companion services fetched once at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracked_services: Vec<String>,

    /// Root of the `active/`, `previous/`, `retired/` and `staging/` slots.
    pub install_root: PathBuf,

    /// Status file shared with the trigger surface. Defaults to `<install_root>/status.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,

    /// Trusted metadata and target cache. Defaults to `<install_root>/metadata`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_dir: Option<PathBuf>,

    /// Executable name inside the release archive. Defaults to the service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_name: Option<String>,

    /// Base URL of the signed metadata feed.
    pub metadata_url: String,

    /// Base URL of target files. Defaults to `<metadata_url>/targets`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets_url: Option<String>,

    /// Base URL joined onto relative artifact paths in descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_base_url: Option<String>,

    #[serde(default)]
    pub credentials: CredentialSource,

    #[serde(default)]
    pub upgrade: UpgradeConfig,

    /// File this configuration was loaded from; passed to the successor process.
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

impl StewardConfig {
    /// Minimal configuration with every optional field defaulted.
    pub fn new(
        service: impl Into<String>,
        install_root: impl Into<PathBuf>,
        metadata_url: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            tracked_services: Vec::new(),
            install_root: install_root.into(),
            status_file: None,
            metadata_dir: None,
            binary_name: None,
            metadata_url: metadata_url.into(),
            targets_url: None,
            artifact_base_url: None,
            credentials: CredentialSource::None,
            upgrade: UpgradeConfig::default(),
            source_path: None,
        }
    }

    /// Load from `path`, or from [`default_path`](Self::default_path) when `None`.
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StewardError::ConfigError {
                message: format!("Configuration file not found: {}", path.display()),
            }
            .into());
        }
        Self::load_from(&path).await
    }

    /// Read, parse, resolve paths, and validate a configuration file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(StewardError::from)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().context("Failed to read current directory")?.join(path)
        };
        let base = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
        config.resolve_paths(&base)?;
        config.source_path = Some(absolute);
        config.validate()?;

        debug!(service = %config.service, path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration as TOML.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        // Token credentials may be stored inline.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path).await?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms).await.with_context(|| {
                format!("Failed to set permissions on {}", path.display())
            })?;
        }

        Ok(())
    }

    /// `~/.steward/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".steward");
        Ok(config_dir.join("config.toml"))
    }

    fn resolve_paths(&mut self, base: &Path) -> Result<()> {
        let resolve = |p: &Path| resolve_path(&p.to_string_lossy(), base);

        self.install_root = resolve(&self.install_root)?;
        if let Some(status_file) = &self.status_file {
            self.status_file = Some(resolve(status_file)?);
        }
        if let Some(metadata_dir) = &self.metadata_dir {
            self.metadata_dir = Some(resolve(metadata_dir)?);
        }
        match &mut self.credentials {
            CredentialSource::TokenFile { path } => *path = resolve(path)?,
            CredentialSource::ServiceAccount { key_file, .. } => *key_file = resolve(key_file)?,
            CredentialSource::None | CredentialSource::Token { .. } => {}
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> {
            Err(StewardError::ConfigError {
                message,
            }
            .into())
        };

        if self.service.trim().is_empty() {
            return invalid("service must not be empty".to_string());
        }
        if let Some(name) = self.tracked_services.iter().find(|s| s.trim().is_empty()) {
            return invalid(format!("tracked service name '{name}' must not be empty"));
        }
        for (key, url) in [
            ("metadata_url", Some(self.metadata_url.as_str())),
            ("targets_url", self.targets_url.as_deref()),
            ("artifact_base_url", self.artifact_base_url.as_deref()),
        ] {
            let Some(url) = url else { continue };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid(format!("{key} must be an http(s) URL, got '{url}'"));
            }
        }
        if self.upgrade.check_interval == 0 || self.upgrade.install_poll_interval == 0 {
            return invalid("upgrade intervals must be greater than zero".to_string());
        }
        if self.binary_name().contains(['/', '\\']) || self.binary_name() == ".." {
            return invalid(format!("binary_name '{}' must be a bare file name", self.binary_name()));
        }
        Ok(())
    }

    pub fn status_file(&self) -> PathBuf {
        self.status_file.clone().unwrap_or_else(|| self.install_root.join("status.json"))
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.metadata_dir.clone().unwrap_or_else(|| self.install_root.join("metadata"))
    }

    pub fn binary_name(&self) -> &str {
        self.binary_name.as_deref().unwrap_or(&self.service)
    }

    pub fn targets_url(&self) -> String {
        self.targets_url
            .clone()
            .unwrap_or_else(|| format!("{}/targets", self.metadata_url.trim_end_matches('/')))
    }

    /// Path the configuration was loaded from, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

//! Scheduling and network settings for the update engine.
//!
//! Lives under the `[upgrade]` table of the steward configuration file.
//! Every field has a default so the table can be omitted entirely:
//!
//! ```toml
//! [upgrade]
//! check_interval = 60          # seconds between metadata checks
//! install_poll_interval = 5    # seconds between update_requested reads
//! request_timeout = 300        # whole-request timeout for downloads
//! connect_timeout = 10
//! lock_timeout = 30            # wait for the cross-process install lock
//! version_layout = "%Y.%m.%d.%H.%M.%S"
//! startup_check = true
//! ```

use crate::constants::{
    DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INSTALL_POLL_INTERVAL_SECS,
    DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_VERSION_LAYOUT,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for background checks and the foreground installer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgradeConfig {
    /// Seconds between background metadata checks.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Seconds between reads of the `update_requested` flag.
    #[serde(default = "default_install_poll_interval")]
    pub install_poll_interval: u64,

    /// Whole-request timeout in seconds for every network step.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds to wait for the install lock before giving up.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: u64,

    /// chrono format string used to parse release versions.
    #[serde(default = "default_version_layout")]
    pub version_layout: String,

    /// Run one check cycle immediately when `serve` starts.
    #[serde(default = "default_startup_check")]
    pub startup_check: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            install_poll_interval: default_install_poll_interval(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            lock_timeout: default_lock_timeout(),
            version_layout: default_version_layout(),
            startup_check: default_startup_check(),
        }
    }
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_install_poll_interval() -> u64 {
    DEFAULT_INSTALL_POLL_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_version_layout() -> String {
    DEFAULT_VERSION_LAYOUT.to_string()
}

fn default_startup_check() -> bool {
    true
}

impl UpgradeConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn install_poll_interval(&self) -> Duration {
        Duration::from_secs(self.install_poll_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }
}

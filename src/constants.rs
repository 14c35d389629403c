//! Timeouts, backoff parameters, and fixed names used across steward.

/// Default interval between background metadata checks.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Default interval at which the installer re-reads `update_requested`.
pub const DEFAULT_INSTALL_POLL_INTERVAL_SECS: u64 = 5;

/// Default whole-request timeout for metadata and artifact downloads.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default time to wait for the install lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Timestamp layout of release versions (`2006.01.02.15.04.05` style).
pub const DEFAULT_VERSION_LAYOUT: &str = "%Y.%m.%d.%H.%M.%S";

/// How long a release stays supported after its release date.
pub const RELEASE_SUPPORT_YEARS: i32 = 2;

/// Maximum delay between lock acquisition attempts.
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Initial delay for exponential backoff.
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Retries for idempotent metadata requests within one tick.
pub const METADATA_FETCH_RETRIES: usize = 3;

/// Buffer size for streaming hashes.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Trust bootstrap file name inside the metadata directory.
pub const ROOT_METADATA_FILE: &str = "root.json";

/// Remote name of the first root metadata version.
pub const INITIAL_ROOT_REMOTE: &str = "1.root.json";

/// Installation record written beside the install slots.
pub const INSTALLATION_RECORD_FILE: &str = "installation.json";

/// Marker left for the successor process before handoff.
pub const HANDOFF_MARKER_FILE: &str = "handoff.json";

/// Subdirectory of `staging/` that receives downloaded artifacts.
pub const DOWNLOADS_DIR: &str = "downloads";


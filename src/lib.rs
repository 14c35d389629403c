//! steward - self-updating service engine
//!
//! A long-running service binary that keeps itself current: it periodically
//! checks a signed metadata feed for a newer release, and when an update is
//! requested it downloads and verifies the release archive, swaps it into
//! place, restarts itself, and keeps the previous installation for rollback.
//!
//! # Architecture Overview
//!
//! Two activities run independently and coordinate only through a small
//! status file:
//!
//! - the background poller sets `update_available` when the feed publishes a
//!   newer release
//! - the foreground installer acts once `update_requested` is set by an
//!   operator (`steward request`) or the service's own API
//!
//! The install itself is a state machine that never leaves the service
//! without a runnable binary: the current installation is moved aside before
//! the new one is renamed into place, and moved back if anything fails before
//! the successor process is running.
//!
//! # Core Modules
//!
//! - [`cli`] - `serve`, `check`, `status`, `request`, `install`, `rollback`
//! - [`config`] - installation configuration (`~/.steward/config.toml`)
//! - [`core`] - error types, classification, and user-facing rendering
//! - [`metadata`] - trust bootstrap and release descriptor resolution
//! - [`status`] - the shared status file and the install lock
//! - [`upgrade`] - poller, installer, install orchestrator, and their parts
//! - [`utils`] - filesystem and HTTP helpers
//!
//! # Installation Layout
//!
//! ```text
//! <install_root>/
//! ├── active/             running release
//! ├── previous/           rollback generation
//! ├── retired/            version-before-previous until the handoff is confirmed
//! ├── staging/            handoff marker; archives under staging/downloads/
//! ├── tracked/<service>/  companion service artifacts
//! ├── metadata/           root.json + cached descriptor targets
//! ├── .locks/install.lock cross-process install lock
//! ├── installation.json   installed versions
//! └── status.json         {"update_available": 0|1, "update_requested": 0|1}
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod metadata;
pub mod status;
pub mod upgrade;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

//! Self-update engine.
//!
//! Two independently scheduled activities share one installation:
//!
//! - the [`BackgroundPoller`] checks the signed metadata feed on a timer and
//!   sets `update_available` in the status file
//! - the [`ForegroundInstaller`] waits for `update_requested` (set by an
//!   operator or the service's API) and drives the [`InstallOrchestrator`]
//!
//! They coordinate only through the [`StatusStore`](crate::status::StatusStore)
//! file and the cross-process install lock.
//!
//! # Update Process Flow
//!
//! ```text
//! 1. Check (poller)
//!    ├── Bootstrap trust on first use (root.json)
//!    ├── Refresh metadata, resolve {service}/{service}-index.json
//!    └── Newer than installation.json? → update_available = 1
//!
//! 2. Install (installer, after update_requested = 1)
//!    ├── Staging:   download artifact into staging/
//!    ├── Verified:  SHA-256 matches the descriptor
//!    ├── BackedUp:  active/ → previous/ (previous/ → retired/)
//!    ├── Installed: extract to a temp dir, rename to active/
//!    └── Restarted: write handoff marker, spawn `<binary> serve --config=…`
//!
//! 3. Confirm (successor process)
//!    └── Cleaned:   clear flags, delete retired/, remove marker
//! ```
//!
//! Any failure before `Restarted` puts the previous installation back into
//! `active/`.

pub mod archive;
pub mod auth;
pub mod backup;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod installation;
pub mod installer;
pub mod launcher;
pub mod orchestrator;
pub mod poller;
pub mod shutdown;
pub mod tracked;
pub mod verification;
pub mod version_check;

pub use engine::{ServeExit, UpdateEngine};
pub use installer::{ForegroundInstaller, InstallerRun};
pub use orchestrator::{InstallOrchestrator, InstallOutcome, InstallState};
pub use poller::{BackgroundPoller, CheckReport};
pub use verification::ChecksumVerifier;
pub use version_check::{VersionComparator, is_newer};

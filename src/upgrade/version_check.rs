//! Version comparison for timestamp-versioned releases.
//!
//! Release versions are timestamps in a fixed layout (by default
//! `%Y.%m.%d.%H.%M.%S`, e.g. `2024.01.01.00.00.00`). A candidate is newer only
//! when both sides parse and the candidate is strictly later. Anything
//! unparsable is "not newer" and logged as a warning, so a malformed feed can
//! never trigger an install.

use crate::constants::{DEFAULT_VERSION_LAYOUT, RELEASE_SUPPORT_YEARS};
use anyhow::{Context, Result};
use chrono::{Months, NaiveDateTime};
use tracing::{debug, warn};

/// `true` when `candidate` is strictly later than `current` under `layout`.
pub fn is_newer(current: &str, candidate: &str, layout: &str) -> bool {
    VersionComparator::new(layout).is_newer(current, candidate)
}

/// Compares timestamp versions and reports support windows.
#[derive(Debug, Clone)]
pub struct VersionComparator {
    layout: String,
}

impl Default for VersionComparator {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_LAYOUT)
    }
}

impl VersionComparator {
    pub fn new(layout: impl Into<String>) -> Self {
        Self {
            layout: layout.into(),
        }
    }

    pub fn layout(&self) -> &str {
        &self.layout
    }

    pub fn parse(&self, version: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(version.trim(), &self.layout).with_context(|| {
            format!("Version '{version}' does not match layout '{}'", self.layout)
        })
    }

    pub fn is_newer(&self, current: &str, candidate: &str) -> bool {
        let current_parsed = match self.parse(current) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Cannot compare versions, current version unparsable: {e:#}");
                return false;
            }
        };
        let candidate_parsed = match self.parse(candidate) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Cannot compare versions, candidate version unparsable: {e:#}");
                return false;
            }
        };

        let newer = candidate_parsed > current_parsed;
        debug!(current, candidate, newer, "Compared versions");
        newer
    }

    /// End of the support window of a release.
    pub fn expiration(&self, version: &str) -> Option<NaiveDateTime> {
        let released = self.parse(version).ok()?;
        released.checked_add_months(Months::new(RELEASE_SUPPORT_YEARS as u32 * 12))
    }

    /// Human-readable remaining support time, relative to `now`.
    pub fn format_validity(&self, version: &str, now: NaiveDateTime) -> String {
        let Some(expires) = self.expiration(version) else {
            return format!("unknown (version '{version}' is not a timestamp)");
        };
        let remaining = expires - now;
        if remaining.num_seconds() <= 0 {
            return format!("expired on {}", expires.format("%Y-%m-%d"));
        }

        let total_hours = remaining.num_hours();
        let total_days = total_hours / 24;
        format!(
            "{} years, {} days, {} hours (until {})",
            total_days / 365,
            total_days % 365,
            total_hours % 24,
            expires.format("%Y-%m-%d")
        )
    }
}

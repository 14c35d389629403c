//! Shared utilities.

pub mod fs;
pub mod http;

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Expand `~` and environment variables in a configured path, resolving a
/// relative result against `base`.
pub fn resolve_path(raw: &str, base: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| anyhow::anyhow!("Failed to expand path '{raw}': {e}"))?;
    let path = PathBuf::from(expanded.as_ref());
    Ok(if path.is_absolute() { path } else { base.join(path) })
}

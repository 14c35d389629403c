//! Directory helpers shared by the install layout.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Create `path` (and parents) if missing; fail if it exists as a file.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).with_context(|| {
            format!(
                "Failed to create directory: {}\n\nCheck directory permissions and path validity",
                path.display()
            )
        })?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Remove a directory tree, treating a missing directory as success.
pub async fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove directory: {}", path.display()))
        }
    }
}

/// Remove a file, treating a missing file as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove file: {}", path.display())),
    }
}

/// Rename `from` to `to` when `from` exists. Returns whether anything moved.
pub async fn rename_if_exists(from: &Path, to: &Path) -> Result<bool> {
    if !tokio::fs::try_exists(from).await.unwrap_or(false) {
        return Ok(false);
    }
    tokio::fs::rename(from, to)
        .await
        .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))?;
    Ok(true)
}

//! Atomic file writes.
//!
//! Every durable record the updater owns (status flags, installation record,
//! trusted root metadata) is replaced whole: content goes to a temporary file
//! in the destination directory, is synced, and is then renamed over the
//! target. Readers in other processes see either the old or the new file,
//! never a torn write.

use crate::utils::fs::dirs::ensure_dir;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Atomically replace `path` with `content`.
///
/// The temporary file is created next to the target so the final rename
/// never crosses a filesystem boundary. Two concurrent writers each get their
/// own temporary file; the last rename wins.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".steward-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in: {}", parent.display()))?;

    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for: {}", path.display()))?;
    temp.as_file().sync_all().with_context(|| "Failed to sync file to disk")?;

    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize JSON for: {}", path.display()))?;
    content.push(b'\n');
    atomic_write(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("nested").join("deeper").join("file.json");

        atomic_write(&target, b"{}").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("status.json");

        atomic_write(&target, b"first").unwrap();
        atomic_write(&target, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn test_atomic_write_json_is_pretty() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("value.json");

        atomic_write_json(&target, &serde_json::json!({"a": 1})).unwrap();

        let content = std::fs::read_to_string(&target).unwrap();
        assert!(content.contains("\"a\": 1"));
        assert!(content.ends_with('\n'));
    }
}

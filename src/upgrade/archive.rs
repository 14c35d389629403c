//! Zip extraction for release archives.
//!
//! Every entry is checked before anything is written: an entry whose name
//! would land outside the destination (absolute paths, `..` components) or a
//! symlink entry fails the whole archive with
//! [`StewardError::PathTraversal`] and the destination stays empty.

use crate::core::StewardError;
use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// One validated archive entry.
#[derive(Debug, Clone)]
struct PlannedEntry {
    index: usize,
    relative: PathBuf,
    is_dir: bool,
    mode: Option<u32>,
}

/// Extracts verified release archives.
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract `archive` into `destination`, returning the number of files written.
    ///
    /// `destination` is created if needed and is expected to be a fresh
    /// directory; the caller renames it into place afterwards.
    pub async fn extract(archive: &Path, destination: &Path) -> Result<usize> {
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();
        tokio::task::spawn_blocking(move || extract_blocking(&archive, &destination))
            .await
            .with_context(|| "Archive extraction task panicked")?
    }

    /// Names of the entries in `archive`, after traversal validation.
    pub async fn list(archive: &Path) -> Result<Vec<PathBuf>> {
        let archive = archive.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut zip = open(&archive)?;
            Ok(plan(&mut zip)?.into_iter().map(|entry| entry.relative).collect())
        })
        .await
        .with_context(|| "Archive listing task panicked")?
    }
}

fn open(archive: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    ZipArchive::new(file).with_context(|| format!("Not a valid zip archive: {}", archive.display()))
}

fn plan(zip: &mut ZipArchive<File>) -> Result<Vec<PlannedEntry>> {
    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index).with_context(|| format!("Failed to read archive entry {index}"))?;
        let name = entry.name().to_string();

        if entry.is_symlink() {
            return Err(StewardError::PathTraversal {
                entry: name,
            }
            .into());
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(StewardError::PathTraversal {
                entry: name,
            }
            .into());
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        entries.push(PlannedEntry {
            index,
            relative,
            is_dir: entry.is_dir(),
            mode: entry.unix_mode(),
        });
    }
    Ok(entries)
}

fn extract_blocking(archive: &Path, destination: &Path) -> Result<usize> {
    let mut zip = open(archive)?;
    let entries = plan(&mut zip)?;

    std::fs::create_dir_all(destination).with_context(|| {
        format!("Failed to create extraction directory: {}", destination.display())
    })?;

    let mut written = 0usize;
    for planned in &entries {
        let target = destination.join(&planned.relative);
        if planned.is_dir {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut entry = zip
            .by_index(planned.index)
            .with_context(|| format!("Failed to read archive entry {}", planned.relative.display()))?;
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create file: {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract: {}", planned.relative.display()))?;
        out.sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = planned.mode {
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o7777))
                    .with_context(|| format!("Failed to set permissions on {}", target.display()))?;
            }
        }

        debug!(entry = %planned.relative.display(), "Extracted");
        written += 1;
    }

    info!(archive = %archive.display(), files = written, "Archive extracted");
    Ok(written)
}

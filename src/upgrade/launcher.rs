//! Spawning the successor process.
//!
//! The successor is invoked as `<active>/<binary> serve --config=<path>`.
//! Launching only has to *start* the process; the old process then exits and
//! the successor confirms its own startup through the handoff marker.

use crate::core::StewardError;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::info;

/// What to start after an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// `serve --config=<config>` against `binary`.
    pub fn serve(binary: impl Into<PathBuf>, config: &Path) -> Self {
        Self {
            binary: binary.into(),
            args: vec!["serve".to_string(), format!("--config={}", config.display())],
        }
    }
}

/// Starts a successor process and reports its pid.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32>;
}

/// Launcher backed by [`std::process::Command`].
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let child = std::process::Command::new(&spec.binary)
            .args(&spec.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| StewardError::SpawnFailed {
                binary: spec.binary.display().to_string(),
                reason: e.to_string(),
            })?;
        let pid = child.id();
        info!(binary = %spec.binary.display(), pid, "Spawned successor process");
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::find_steward_error;

    #[test]
    fn test_serve_spec() {
        let spec = LaunchSpec::serve("/srv/svc/active/svc", Path::new("/etc/svc/config.toml"));
        assert_eq!(spec.args, vec!["serve", "--config=/etc/svc/config.toml"]);
    }

    #[test]
    fn test_missing_binary_is_spawn_failure() {
        let temp = tempfile::TempDir::new().unwrap();
        let spec = LaunchSpec::serve(temp.path().join("missing"), Path::new("c.toml"));
        let err = CommandLauncher.launch(&spec).unwrap_err();
        assert!(matches!(find_steward_error(&err), Some(StewardError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_launches_real_process() {
        let spec = LaunchSpec {
            binary: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "exit 0".to_string()],
        };
        assert!(CommandLauncher.launch(&spec).unwrap() > 0);
    }
}

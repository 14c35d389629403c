//! Command-line interface for steward.
//!
//! # Commands
//!
//! - `serve` - run the service's update loop (poller + installer) until
//!   Ctrl-C or a handoff to a newly installed release
//! - `check` - run one update check now
//! - `status` - show update flags and installed versions
//! - `request` - ask the installer to apply the available update
//! - `install` - run one installer pass in the foreground
//! - `rollback` - swap the previous installation back into place
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: debug logging
//! - `--quiet` / `-q`: warnings and errors only
//! - `--config` / `-c`: configuration file (default `~/.steward/config.toml`)

mod check;
mod install;
mod request;
mod rollback;
mod serve;
mod status;


use crate::config::StewardConfig;
use crate::metadata::HttpTrustRepository;
use crate::upgrade::UpdateEngine;
use crate::upgrade::fetch::ArtifactFetcher;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter directive, `None` to defer to `RUST_LOG` or the default.
    pub log_level: Option<String>,

    /// Explicit configuration file.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Self-updating service engine",
    version,
    long_about = "steward checks a signed metadata feed for new releases of a service, \
                  installs them on request with verified downloads and automatic rollback, \
                  and hands off to the new process."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "STEWARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the update loop until shutdown or handoff
    Serve(serve::ServeCommand),

    /// Check for a newer release once
    Check(check::CheckCommand),

    /// Show update flags and installed versions
    Status(status::StatusCommand),

    /// Request installation of the available update
    Request(request::RequestCommand),

    /// Run one installer pass now
    Install(install::InstallCommand),

    /// Restore the previous installation
    Rollback(rollback::RollbackCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("warn".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Serve(cmd) => cmd.execute(config).await,
            Commands::Check(cmd) => cmd.execute(config).await,
            Commands::Status(cmd) => cmd.execute(config).await,
            Commands::Request(cmd) => cmd.execute(config).await,
            Commands::Install(cmd) => cmd.execute(config).await,
            Commands::Rollback(cmd) => cmd.execute(config).await,
        }
    }
}

/// Load the configuration and build the production engine.
async fn load_engine(
    config: &CliConfig,
) -> Result<UpdateEngine<HttpTrustRepository, ArtifactFetcher>> {
    let steward_config = StewardConfig::load(config.config_path.clone()).await?;
    UpdateEngine::from_config(steward_config)
}

use super::{CliConfig, load_engine};
use crate::upgrade::InstallerRun;
use crate::upgrade::shutdown::Shutdown;
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Set update_requested before running
    #[arg(long)]
    pub(crate) request: bool,
}

impl InstallCommand {
    pub async fn execute(self, config: CliConfig) -> Result<()> {
        let engine = load_engine(&config).await?;
        if self.request {
            engine.status().request_update().await?;
        }

        match engine.installer().run_once(&Shutdown::never()).await? {
            InstallerRun::NotRequested => {
                println!("No update requested (use --request or `steward request`)");
            }
            InstallerRun::NothingCached => {
                println!("{}", "No release checked yet, run `steward check` first".yellow());
            }
            InstallerRun::UpToDate {
                current,
                candidate,
            } => {
                let current = current.unwrap_or_else(|| "unknown".to_string());
                println!("{}", format!("Already up to date ({current}, latest {candidate})").green());
            }
            InstallerRun::Held {
                version,
                error,
            } => {
                let reason = error.as_deref().unwrap_or("unknown error");
                bail!("Release {version} failed earlier ({reason}); run `steward request` to retry it");
            }
            InstallerRun::Completed(outcome) => {
                if !outcome.succeeded() {
                    let reached = outcome.last_reached();
                    let reason = outcome.error.as_deref().unwrap_or("unknown error");
                    bail!("Install of {} stopped after {reached}: {reason}", outcome.version);
                }
                println!(
                    "{}",
                    format!("Installed {} and started it", outcome.version).green()
                );
                if let Some(pid) = outcome.successor_pid {
                    println!("  Successor process: {pid}");
                }
            }
        }
        Ok(())
    }
}

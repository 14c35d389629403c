use super::{CliConfig, load_engine};
use crate::upgrade::ServeExit;
use crate::upgrade::shutdown;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ServeCommand {}

impl ServeCommand {
    pub async fn execute(self, config: CliConfig) -> Result<()> {
        let engine = load_engine(&config).await?;
        let (handle, listener) = shutdown::channel();

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    handle.trigger();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
            }
        });

        match engine.serve(listener).await? {
            ServeExit::Stopped => {
                info!("Stopped");
            }
            ServeExit::HandedOff(outcome) => {
                let pid = outcome.successor_pid.map_or_else(|| "?".to_string(), |p| p.to_string());
                println!(
                    "{}",
                    format!("Installed {} and handed off to process {pid}", outcome.version).green()
                );
            }
        }
        Ok(())
    }
}

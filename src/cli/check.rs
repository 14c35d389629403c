use super::{CliConfig, load_engine};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct CheckCommand {}

impl CheckCommand {
    pub async fn execute(self, config: CliConfig) -> Result<()> {
        let engine = load_engine(&config).await?;
        println!("{}", "Checking for updates...".cyan());

        let report = engine.poller().tick().await?;
        let current = report.current.as_deref().unwrap_or("unknown");
        if report.update_available {
            println!("{}", format!("Update available: {current} -> {}", report.candidate).green());
            println!("Run `steward request` to install it");
        } else {
            println!("{}", format!("Up to date ({current})").green());
        }
        Ok(())
    }
}

use super::{CliConfig, load_engine};
use crate::status::InstallLock;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Swap `previous/` back into `active/`. The running service is not restarted.
#[derive(Args, Debug)]
pub struct RollbackCommand {}

impl RollbackCommand {
    pub async fn execute(self, config: CliConfig) -> Result<()> {
        let engine = load_engine(&config).await?;
        let _lock =
            InstallLock::acquire(engine.layout().root(), engine.config().upgrade.lock_timeout())
                .await?;

        let current = engine.orchestrator().rollback().await?;
        match current {
            Some(version) => {
                println!("{}", format!("Rolled back to {}", version.version_id).green());
            }
            None => println!("{}", "Rolled back (installed version unknown)".green()),
        }
        println!("Restart the service to run the restored release");
        Ok(())
    }
}

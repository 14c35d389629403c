use super::{CliConfig, load_engine};
use crate::upgrade::VersionComparator;
use crate::upgrade::installation::InstallationRecord;
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Print machine-readable JSON
    #[arg(long)]
    pub(crate) json: bool,
}

impl StatusCommand {
    pub async fn execute(self, config: CliConfig) -> Result<()> {
        let engine = load_engine(&config).await?;
        let status = engine.status().read().await;
        let record = InstallationRecord::load(&engine.layout().record_path()).await?;

        if self.json {
            let output = serde_json::json!({
                "service": engine.config().service,
                "status": status,
                "current": record.current,
                "previous": record.previous,
                "tracked": record.tracked,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        let comparator = VersionComparator::new(engine.config().upgrade.version_layout.clone());
        let now = Utc::now().naive_utc();

        println!("{}", format!("Service: {}", engine.config().service).bold());
        match &record.current {
            Some(current) => {
                println!("  Installed: {}", current.version_id.green());
                println!(
                    "  Support:   {}",
                    comparator.format_validity(current.comparison_key(), now)
                );
            }
            None => println!("  Installed: {}", "unknown".yellow()),
        }
        if let Some(previous) = &record.previous {
            println!("  Previous:  {}", previous.version_id);
        }

        println!("  Update available: {}", yes_no(status.update_available));
        println!("  Update requested: {}", yes_no(status.update_requested));
        if let Some(error) = &status.last_error {
            println!("  Last error: {}", error.red());
        }

        for (name, version) in &record.tracked {
            println!("  Tracked {name}: {}", version.version_id);
        }
        Ok(())
    }
}

fn yes_no(flag: bool) -> colored::ColoredString {
    if flag {
        "yes".green()
    } else {
        "no".normal()
    }
}

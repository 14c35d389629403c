use super::{CliConfig, load_engine};
use crate::status::TriggerResponse;
use anyhow::{Result, anyhow};
use clap::Args;

/// Set `update_requested` so the running installer applies the cached release.
#[derive(Args, Debug)]
pub struct RequestCommand {}

impl RequestCommand {
    pub async fn execute(self, config: CliConfig) -> Result<()> {
        let engine = load_engine(&config).await?;
        let result = engine.status().request_update().await.map(|_| ());
        let response = TriggerResponse::from(&result);
        println!("{}", serde_json::to_string(&response)?);
        result.map_err(|e| anyhow!("Failed to request update: {e:#}"))
    }
}

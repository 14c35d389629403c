//! Wiring of the update components from a [`StewardConfig`].

use super::auth::TokenProvider;
use super::fetch::{ArtifactFetcher, ArtifactSource};
use super::installation::InstallLayout;
use super::installer::ForegroundInstaller;
use super::launcher::{CommandLauncher, ProcessLauncher};
use super::orchestrator::{InstallOrchestrator, InstallOutcome, InstallState, OrchestratorSettings};
use super::poller::BackgroundPoller;
use super::shutdown::Shutdown;
use super::tracked::TrackedServices;
use super::version_check::VersionComparator;
use crate::config::StewardConfig;
use crate::metadata::{HttpTrustRepository, MetadataClient, TrustRepository};
use crate::status::StatusStore;
use crate::utils::http::build_client;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// How `serve` ended.
#[derive(Debug)]
pub enum ServeExit {
    /// Shutdown was requested.
    Stopped,
    /// A new release was installed and its process started.
    HandedOff(InstallOutcome),
}

/// The update engine of one installation.
pub struct UpdateEngine<R, A> {
    config: StewardConfig,
    layout: InstallLayout,
    metadata: Arc<MetadataClient<R>>,
    source: A,
    launcher: Arc<dyn ProcessLauncher>,
    status: StatusStore,
}

impl UpdateEngine<HttpTrustRepository, ArtifactFetcher> {
    /// Production wiring: HTTP metadata, HTTP artifacts, real process spawn.
    pub fn from_config(config: StewardConfig) -> Result<Self> {
        let timeout = config.upgrade.request_timeout();
        let client = build_client(&config.upgrade)?;
        let repository = HttpTrustRepository::new(
            client.clone(),
            &config.metadata_url,
            config.targets_url(),
            config.metadata_dir(),
            timeout,
        );
        let tokens = TokenProvider::new(config.credentials.clone(), client.clone(), timeout);
        let fetcher = ArtifactFetcher::new(client, tokens, config.artifact_base_url.clone(), timeout);
        Ok(Self::with_parts(config, repository, fetcher, Arc::new(CommandLauncher)))
    }
}

impl<R: TrustRepository, A: ArtifactSource + Clone> UpdateEngine<R, A> {
    pub fn with_parts(
        config: StewardConfig,
        repository: R,
        source: A,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let layout = InstallLayout::new(&config.install_root);
        let metadata = Arc::new(MetadataClient::new(repository, config.metadata_dir()));
        let status = StatusStore::new(config.status_file());
        Self {
            config,
            layout,
            metadata,
            source,
            launcher,
            status,
        }
    }

    pub fn config(&self) -> &StewardConfig {
        &self.config
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn metadata(&self) -> &MetadataClient<R> {
        &self.metadata
    }

    fn comparator(&self) -> VersionComparator {
        VersionComparator::new(&self.config.upgrade.version_layout)
    }

    fn config_path(&self) -> PathBuf {
        self.config
            .source_path()
            .map(PathBuf::from)
            .or_else(|| StewardConfig::default_path().ok())
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn poller(&self) -> BackgroundPoller<R> {
        BackgroundPoller::new(
            &self.config.service,
            Arc::clone(&self.metadata),
            self.status.clone(),
            self.layout.clone(),
            self.comparator(),
            self.config.upgrade.check_interval(),
        )
    }

    pub fn orchestrator(&self) -> InstallOrchestrator<A> {
        InstallOrchestrator::new(
            OrchestratorSettings {
                layout: self.layout.clone(),
                binary_name: self.config.binary_name().to_string(),
                config_path: self.config_path(),
            },
            self.source.clone(),
            Arc::clone(&self.launcher),
            self.status.clone(),
        )
    }

    pub fn installer(&self) -> ForegroundInstaller<R, A> {
        ForegroundInstaller::new(
            &self.config.service,
            Arc::clone(&self.metadata),
            self.orchestrator(),
            self.comparator(),
            self.config.upgrade.lock_timeout(),
            self.config.upgrade.install_poll_interval(),
        )
    }

    pub fn tracked(&self) -> TrackedServices<R, A> {
        TrackedServices::new(Arc::clone(&self.metadata), self.source.clone(), self.layout.clone())
    }

    /// Long-running mode: confirm a pending handoff, fetch tracked services,
    /// then run the poller and the installer until shutdown or handoff.
    pub async fn serve(&self, shutdown: Shutdown) -> Result<ServeExit> {
        let handshake = self.orchestrator().confirm_startup().await?;
        if handshake == InstallState::Cleaned {
            info!(service = %self.config.service, "Completed handoff from previous process");
        }

        if !self.config.tracked_services.is_empty() {
            self.tracked().fetch_all(&self.config.tracked_services, &shutdown).await;
        }

        let poller = self.poller();
        if self.config.upgrade.startup_check {
            if let Err(e) = poller.tick().await {
                warn!(service = %self.config.service, "Startup update check failed: {e:#}");
            }
        }

        let installer = self.installer();
        info!(service = %self.config.service, "Serving");
        let exit = tokio::select! {
            outcome = installer.watch(shutdown.clone()) => match outcome {
                Some(outcome) => ServeExit::HandedOff(outcome),
                None => ServeExit::Stopped,
            },
            () = poller.run(shutdown.clone()) => ServeExit::Stopped,
        };
        Ok(exit)
    }
}

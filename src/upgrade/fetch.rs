//! Artifact download.
//!
//! [`ArtifactFetcher`] performs one authenticated GET per artifact and streams
//! the body to disk chunk by chunk. The request must answer HTTP 200. When the
//! server names the file through `Content-Disposition`, that name (reduced to
//! a bare file name) is used in the directory of the caller's path; otherwise
//! the caller's path is used. The orchestrator passes a path under
//! `staging/downloads/`, which holds nothing but downloads. A shutdown signal or a transport error aborts the
//! transfer and removes the partial file.

use super::auth::TokenProvider;
use super::shutdown::Shutdown;
use crate::core::StewardError;
use crate::utils::http::map_reqwest_error;
use anyhow::{Context, Result};
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A fully written staged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Something that can place a release artifact into staging.
///
/// [`ArtifactFetcher`] is the HTTP implementation. Tests substitute an
/// in-memory source.
pub trait ArtifactSource: Send + Sync {
    /// Fetch `locator` to `local_path` (or a sibling name the source chooses).
    ///
    /// The returned [`StagedArtifact::path`] is where the bytes actually
    /// landed and must be used instead of `local_path`.
    fn stage(
        &self,
        locator: &str,
        local_path: &Path,
        shutdown: &Shutdown,
    ) -> impl Future<Output = Result<StagedArtifact>> + Send;
}

/// Downloads release artifacts into the staging directory.
///
/// Each download obtains a bearer token from the configured
/// [`TokenProvider`] (if any) and streams the body to disk, so memory use
/// does not grow with the artifact size.
///
/// # Examples
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::time::Duration;
/// use steward::config::CredentialSource;
/// use steward::upgrade::auth::TokenProvider;
/// use steward::upgrade::fetch::ArtifactFetcher;
/// use steward::upgrade::shutdown::Shutdown;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = reqwest::Client::new();
/// let timeout = Duration::from_secs(60);
/// let fetcher = ArtifactFetcher::new(
///     client.clone(),
///     TokenProvider::new(CredentialSource::None, client, timeout),
///     Some("https://artifacts.example.com".to_string()),
///     timeout,
/// );
///
/// let staged = fetcher
///     .download("releases/svc.zip", Path::new("/tmp/svc.zip"), &Shutdown::never())
///     .await?;
/// println!("{} bytes at {}", staged.bytes_written, staged.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    tokens: TokenProvider,
    artifact_base_url: Option<String>,
    timeout: Duration,
}

impl ArtifactFetcher {
    /// # Arguments
    ///
    /// * `client` - shared HTTP client, already carrying connect and request timeouts
    /// * `tokens` - bearer token source for the artifact store
    /// * `artifact_base_url` - base for relative locators; a trailing `/` is dropped
    /// * `timeout` - reported in timeout errors
    pub fn new(
        client: reqwest::Client,
        tokens: TokenProvider,
        artifact_base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            tokens,
            artifact_base_url: artifact_base_url.map(|u| u.trim_end_matches('/').to_string()),
            timeout,
        }
    }

    /// Absolute URL for a descriptor's artifact locator.
    ///
    /// `http://` and `https://` locators are returned as they are. Anything
    /// else is joined onto `artifact_base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StewardError::ConfigError`] for a relative locator when no
    /// base URL is configured.
    pub fn resolve_url(&self, locator: &str) -> Result<String> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Ok(locator.to_string());
        }
        match &self.artifact_base_url {
            Some(base) => Ok(format!("{base}/{}", locator.trim_start_matches('/'))),
            None => Err(StewardError::ConfigError {
                message: format!(
                    "artifact path '{locator}' is relative and no artifact_base_url is configured"
                ),
            }
            .into()),
        }
    }

    /// Stream `locator` to `local_path` (or the server-suggested name beside it).
    ///
    /// # Arguments
    ///
    /// * `locator` - absolute URL or path relative to `artifact_base_url`
    /// * `local_path` - destination; its directory receives a server-named file
    /// * `shutdown` - aborts the request or the transfer when triggered
    ///
    /// # Returns
    ///
    /// The path actually written and the number of bytes streamed.
    ///
    /// # Errors
    ///
    /// - [`StewardError::HttpStatus`] for any status other than 200
    /// - [`StewardError::NetworkError`] or [`StewardError::Timeout`] for transport failures
    /// - [`StewardError::Cancelled`] when `shutdown` fires
    ///
    /// The partial file is removed on every error after the transfer started.
    pub async fn download(
        &self,
        locator: &str,
        local_path: &Path,
        shutdown: &Shutdown,
    ) -> Result<StagedArtifact> {
        let url = self.resolve_url(locator)?;
        let token = self.tokens.bearer_token().await?;

        let mut request = self.client.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        info!(url = %url, "Downloading artifact");
        let mut cancel = shutdown.clone();
        let response = tokio::select! {
            response = request.send() => response.map_err(|e| map_reqwest_error("artifact download", &e, self.timeout))?,
            () = cancel.wait() => return Err(cancelled()),
        };

        if response.status() != reqwest::StatusCode::OK {
            return Err(StewardError::HttpStatus {
                url,
                status: response.status().as_u16(),
            }
            .into());
        }

        let target = content_disposition_name(response.headers())
            .and_then(|name| local_path.parent().map(|dir| dir.join(name)))
            .unwrap_or_else(|| local_path.to_path_buf());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create staging directory: {}", parent.display()))?;
        }

        match self.stream_to_file(response, &target, &mut cancel).await {
            Ok(bytes_written) => {
                info!(path = %target.display(), bytes = bytes_written, "Artifact staged");
                Ok(StagedArtifact {
                    path: target,
                    bytes_written,
                })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %target.display(), error = %remove_err, "Failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        target: &Path,
        cancel: &mut Shutdown,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(target)
            .await
            .with_context(|| format!("Failed to create staged file: {}", target.display()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                () = cancel.wait() => return Err(cancelled()),
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| map_reqwest_error("artifact download", &e, self.timeout))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write staged file: {}", target.display()))?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await.with_context(|| "Failed to sync staged file to disk")?;
        debug!(path = %target.display(), written, "Download stream finished");
        Ok(written)
    }
}

impl ArtifactSource for ArtifactFetcher {
    async fn stage(&self, locator: &str, local_path: &Path, shutdown: &Shutdown) -> Result<StagedArtifact> {
        self.download(locator, local_path, shutdown).await
    }
}

fn cancelled() -> anyhow::Error {
    StewardError::Cancelled {
        operation: "artifact download".to_string(),
    }
    .into()
}

/// File name from a `Content-Disposition` header, reduced to a safe bare name.
///
/// Directory components (either separator) are stripped, and `.`/`..` or an
/// empty name yield `None`.
///
/// # Examples
///
/// ```rust
/// use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderValue};
/// use steward::upgrade::fetch::content_disposition_name;
///
/// let mut headers = HeaderMap::new();
/// headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(r#"attachment; filename="../svc.zip""#));
/// assert_eq!(content_disposition_name(&headers).as_deref(), Some("svc.zip"));
/// ```
pub fn content_disposition_name(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::CONTENT_DISPOSITION)?.to_str().ok()?;
    let raw = value.split(';').map(str::trim).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim().eq_ignore_ascii_case("filename").then(|| val.trim().trim_matches('"'))
    })?;
    sanitize_file_name(raw)
}

fn sanitize_file_name(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let name = normalized.rsplit('/').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialSource;
    use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderValue};

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn fetcher(base: Option<&str>) -> ArtifactFetcher {
        let client = reqwest::Client::new();
        ArtifactFetcher::new(
            client.clone(),
            TokenProvider::new(CredentialSource::None, client, Duration::from_secs(5)),
            base.map(str::to_string),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_content_disposition_plain_and_quoted() {
        assert_eq!(
            content_disposition_name(&headers("attachment; filename=release.zip")).as_deref(),
            Some("release.zip")
        );
        assert_eq!(
            content_disposition_name(&headers("attachment; filename=\"svc 2024.zip\"")).as_deref(),
            Some("svc 2024.zip")
        );
    }

    #[test]
    fn test_content_disposition_strips_directories() {
        assert_eq!(
            content_disposition_name(&headers("attachment; filename=\"../../etc/passwd\"")).as_deref(),
            Some("passwd")
        );
        assert_eq!(
            content_disposition_name(&headers("attachment; filename=\"..\\..\\evil.exe\"")).as_deref(),
            Some("evil.exe")
        );
        assert_eq!(content_disposition_name(&headers("attachment; filename=\"..\"")), None);
        assert_eq!(content_disposition_name(&headers("inline")), None);
    }

    #[test]
    fn test_resolve_url() {
        let with_base = fetcher(Some("https://cdn.example.com/releases/"));
        assert_eq!(
            with_base.resolve_url("svc/svc.zip").unwrap(),
            "https://cdn.example.com/releases/svc/svc.zip"
        );
        assert_eq!(
            with_base.resolve_url("https://other.example.com/a.zip").unwrap(),
            "https://other.example.com/a.zip"
        );
        assert!(fetcher(None).resolve_url("svc/svc.zip").is_err());
    }
}

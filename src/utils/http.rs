//! Shared HTTP plumbing: client construction with bounded timeouts and a
//! retrying GET for small metadata documents.

use crate::constants::{METADATA_FETCH_RETRIES, STARTING_BACKOFF_DELAY_MS};
use crate::core::StewardError;
use crate::upgrade::config::UpgradeConfig;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

/// Build a client whose every request is bounded by the configured timeouts.
pub fn build_client(config: &UpgradeConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("steward/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// Translate a transport error into a classified [`StewardError`].
pub fn map_reqwest_error(operation: &str, error: &reqwest::Error, timeout: Duration) -> StewardError {
    if error.is_timeout() {
        StewardError::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        StewardError::NetworkError {
            operation: operation.to_string(),
            reason: error.to_string(),
        }
    }
}

/// GET `url` and return the body, requiring HTTP 200.
///
/// Transport errors and 5xx responses are retried a few times with backoff;
/// any other status fails immediately.
pub async fn get_bytes(
    client: &reqwest::Client,
    url: &str,
    operation: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
        .factor(10)
        .max_delay(Duration::from_secs(2))
        .take(METADATA_FETCH_RETRIES);

    let attempt = move || async move {
        debug!(url, operation, "GET");
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| RetryableError::retry(map_reqwest_error(operation, &e, timeout)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let error = StewardError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            };
            return Err(if status.is_server_error() {
                RetryableError::retry(error)
            } else {
                RetryableError::fatal(error)
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RetryableError::retry(map_reqwest_error(operation, &e, timeout)))
    };

    tokio_retry::RetryIf::start(strategy, attempt, |e: &RetryableError| e.retryable)
        .await
        .map_err(|e| anyhow::Error::from(e.error))
}

struct RetryableError {
    error: StewardError,
    retryable: bool,
}

impl RetryableError {
    fn retry(error: StewardError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn fatal(error: StewardError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

//! Bearer tokens for the artifact store.
//!
//! [`TokenProvider`] turns a [`CredentialSource`] into an `Authorization:
//! Bearer` token. Service-account credentials use the OAuth2 JWT-bearer grant:
//! an RS256-signed assertion is exchanged at the key's `token_uri` for a
//! short-lived access token, which is cached until shortly before it expires.

use crate::config::CredentialSource;
use crate::core::StewardError;
use crate::utils::http::map_reqwest_error;
use anyhow::Result;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Fields of a service-account key file that the grant needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: u64,
}

/// Resolves bearer tokens from the configured credential source.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    source: CredentialSource,
    client: reqwest::Client,
    timeout: Duration,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn credential_error(reason: impl Into<String>) -> StewardError {
    StewardError::CredentialError {
        reason: reason.into(),
    }
}

impl TokenProvider {
    pub fn new(source: CredentialSource, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            source,
            client,
            timeout,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// The token to send, or `None` for anonymous access.
    pub async fn bearer_token(&self) -> Result<Option<String>> {
        match &self.source {
            CredentialSource::None => Ok(None),
            CredentialSource::Token {
                value,
            } => Ok(Some(value.clone())),
            CredentialSource::TokenFile {
                path,
            } => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    credential_error(format!("cannot read token file {}: {e}", path.display()))
                })?;
                let token = content.trim();
                if token.is_empty() {
                    return Err(credential_error(format!("token file {} is empty", path.display())).into());
                }
                Ok(Some(token.to_string()))
            }
            CredentialSource::ServiceAccount {
                key_file,
                scope,
            } => {
                let mut cached = self.cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if token.expires_at > now_secs() + EXPIRY_MARGIN_SECS {
                        return Ok(Some(token.value.clone()));
                    }
                }

                let raw = tokio::fs::read(key_file).await.map_err(|e| {
                    credential_error(format!("cannot read key file {}: {e}", key_file.display()))
                })?;
                let key: ServiceAccountKey = serde_json::from_slice(&raw)
                    .map_err(|e| credential_error(format!("invalid service account key: {e}")))?;

                let token = self.exchange(&key, scope).await?;
                let value = token.value.clone();
                *cached = Some(token);
                Ok(Some(value))
            }
        }
    }

    async fn exchange(&self, key: &ServiceAccountKey, scope: &str) -> Result<CachedToken> {
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let issued_at = now_secs();
        let assertion = sign_assertion(key, scope, token_uri, issued_at)?;

        debug!(client_email = %key.client_email, token_uri, "Exchanging service account assertion");
        let response = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| map_reqwest_error("token exchange", &e, self.timeout))?;

        if !response.status().is_success() {
            return Err(credential_error(format!(
                "token endpoint {token_uri} answered HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| credential_error(format!("invalid token response: {e}")))?;

        Ok(CachedToken {
            value: body.access_token,
            expires_at: issued_at + body.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS),
        })
    }
}

/// Build the RS256-signed grant assertion for a service-account key.
pub fn sign_assertion(
    key: &ServiceAccountKey,
    scope: &str,
    audience: &str,
    issued_at: u64,
) -> Result<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let claims = GrantClaims {
        iss: &key.client_email,
        scope,
        aud: audience,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| credential_error(format!("invalid private key: {e}")))?;
    encode(&header, &claims, &encoding_key)
        .map_err(|e| credential_error(format!("failed to sign assertion: {e}")).into())
}

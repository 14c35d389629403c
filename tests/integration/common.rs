//! Shared fixtures: a local HTTP server and a published release feed.

use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steward::config::{CredentialSource, StewardConfig};
use steward::metadata::HttpTrustRepository;
use steward::test_utils::{RecordingLauncher, build_zip_bytes, descriptor_index_sized};
use steward::upgrade::UpdateEngine;
use steward::upgrade::auth::TokenProvider;
use steward::upgrade::fetch::ArtifactFetcher;
use steward::upgrade::verification::ChecksumVerifier;
use tokio::task::JoinHandle;

pub const SERVICE: &str = "svc";
pub const OLD_VERSION: &str = "2023.01.01.00.00.00";
pub const NEW_VERSION: &str = "2024.01.01.00.00.00";

/// One file served by [`TestServer`].
#[derive(Debug, Clone, Default)]
pub struct Served {
    pub body: Vec<u8>,
    pub content_disposition: Option<String>,
    /// Wait this long before answering.
    pub delay: Option<Duration>,
    /// Answer with this status instead of 200.
    pub status: Option<StatusCode>,
}

#[derive(Debug, Default)]
struct ServerState {
    files: Mutex<HashMap<String, Served>>,
    authorizations: Mutex<Vec<Option<String>>>,
}

/// HTTP server on an ephemeral port serving files by exact path.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(ServerState::default());
        let app = Router::new().fallback(serve_file).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            task,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn publish(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.publish_with(
            path,
            Served {
                body: body.into(),
                ..Served::default()
            },
        );
    }

    pub fn publish_with(&self, path: &str, served: Served) {
        self.state.files.lock().unwrap().insert(path.to_string(), served);
    }

    pub fn remove(&self, path: &str) {
        self.state.files.lock().unwrap().remove(path);
    }

    /// Number of requests answered so far.
    pub fn request_count(&self) -> usize {
        self.state.authorizations.lock().unwrap().len()
    }

    /// `Authorization` header of every request so far.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.state.authorizations.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_file(State(state): State<Arc<ServerState>>, uri: Uri, request_headers: HeaderMap) -> Response {
    let authorization = request_headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.authorizations.lock().unwrap().push(authorization);

    let entry = state.files.lock().unwrap().get(uri.path()).cloned();
    let Some(entry) = entry else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(delay) = entry.delay {
        tokio::time::sleep(delay).await;
    }

    let mut headers = HeaderMap::new();
    if let Some(disposition) = entry.content_disposition {
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(&disposition).unwrap());
    }
    (entry.status.unwrap_or(StatusCode::OK), headers, entry.body).into_response()
}

/// Zip holding the service binary with `content`.
pub fn release_archive(content: &[u8]) -> Vec<u8> {
    build_zip_bytes(&[(SERVICE, content)]).unwrap()
}

/// Publish root, targets role, descriptor index and artifact for `version`.
///
/// `published_sha256` overrides the artifact hash written into the descriptor.
pub fn publish_release(
    server: &TestServer,
    version: &str,
    artifact: &[u8],
    published_sha256: Option<&str>,
    role_version: u64,
) {
    let artifact_path = format!("/artifacts/{SERVICE}-{version}.zip");
    server.publish(&artifact_path, artifact.to_vec());

    let mut index: serde_json::Value = serde_json::from_str(&descriptor_index_sized(
        SERVICE,
        version,
        &server.url(&artifact_path),
        artifact,
    ))
    .unwrap();
    if let Some(sha) = published_sha256 {
        index[SERVICE]["hashes"]["sha256"] = serde_json::Value::from(sha);
    }
    let index = index.to_string().into_bytes();
    let index_sha = ChecksumVerifier::sha256_bytes(&index);
    server.publish(&format!("/targets/{SERVICE}/{index_sha}.{SERVICE}-index.json"), index.clone());

    let target_path = format!("{SERVICE}/{SERVICE}-index.json");
    let role = serde_json::json!({
        "signed": {
            "_type": "targets",
            "version": role_version,
            "expires": "2099-01-01T00:00:00Z",
            "targets": {
                target_path: {
                    "length": index.len(),
                    "hashes": { "sha256": index_sha },
                }
            }
        }
    });
    server.publish("/metadata/targets.json", role.to_string());
    server.publish("/metadata/1.root.json", r#"{"signed":{"_type":"root","version":1}}"#);
}

pub fn test_config(root: &Path, server: &TestServer) -> StewardConfig {
    let mut config = StewardConfig::new(SERVICE, root, server.url("/metadata"));
    config.targets_url = Some(server.url("/targets"));
    config.upgrade.request_timeout = 10;
    config.upgrade.lock_timeout = 2;
    config.upgrade.install_poll_interval = 1;
    config
}

/// Engine over real HTTP with a launcher that only records launches.
pub fn http_engine(
    config: StewardConfig,
    launcher: Arc<RecordingLauncher>,
) -> UpdateEngine<HttpTrustRepository, ArtifactFetcher> {
    let timeout = config.upgrade.request_timeout();
    let client = reqwest::Client::new();
    let repository = HttpTrustRepository::new(
        client.clone(),
        &config.metadata_url,
        config.targets_url(),
        config.metadata_dir(),
        timeout,
    );
    let tokens = TokenProvider::new(CredentialSource::None, client.clone(), timeout);
    let fetcher = ArtifactFetcher::new(client, tokens, None, timeout);
    UpdateEngine::with_parts(config, repository, fetcher, launcher)
}

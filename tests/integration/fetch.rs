use crate::common::{Served, TestServer};
use std::time::Duration;
use axum::http::StatusCode;
use steward::config::CredentialSource;
use steward::constants::METADATA_FETCH_RETRIES;
use steward::core::{StewardError, find_steward_error};
use steward::upgrade::auth::TokenProvider;
use steward::upgrade::fetch::ArtifactFetcher;
use steward::upgrade::shutdown::{self, Shutdown};
use steward::utils::http::get_bytes;
use tempfile::TempDir;

fn fetcher(credentials: CredentialSource, base_url: Option<String>) -> ArtifactFetcher {
    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(10);
    ArtifactFetcher::new(client.clone(), TokenProvider::new(credentials, client, timeout), base_url, timeout)
}

#[tokio::test]
async fn test_download_writes_caller_path() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    server.publish("/releases/svc.zip", b"artifact-bytes".to_vec());

    let local = temp.path().join("staging").join("svc.zip");
    let staged = fetcher(CredentialSource::None, None)
        .download(&server.url("/releases/svc.zip"), &local, &Shutdown::never())
        .await
        .unwrap();

    assert_eq!(staged.path, local);
    assert_eq!(staged.bytes_written, 14);
    assert_eq!(std::fs::read(&local).unwrap(), b"artifact-bytes");
    assert_eq!(server.authorizations(), vec![None]);
}

#[tokio::test]
async fn test_content_disposition_names_file() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    server.publish_with(
        "/download",
        Served {
            body: b"zip".to_vec(),
            content_disposition: Some(r#"attachment; filename="../svc-2024.zip""#.to_string()),
            delay: None,
            status: None,
        },
    );

    let staged = fetcher(CredentialSource::None, Some(server.url("/")))
        .download("download", &temp.path().join("fallback.zip"), &Shutdown::never())
        .await
        .unwrap();

    assert_eq!(staged.path, temp.path().join("svc-2024.zip"));
    assert!(!temp.path().join("fallback.zip").exists());
}

#[tokio::test]
async fn test_bearer_token_sent() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    server.publish("/a.zip", b"a".to_vec());

    let credentials = CredentialSource::Token {
        value: "secret-token".to_string(),
    };
    fetcher(credentials, None)
        .download(&server.url("/a.zip"), &temp.path().join("a.zip"), &Shutdown::never())
        .await
        .unwrap();

    assert_eq!(server.authorizations(), vec![Some("Bearer secret-token".to_string())]);
}

#[tokio::test]
async fn test_not_found_is_http_status() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let local = temp.path().join("missing.zip");

    let err = fetcher(CredentialSource::None, None)
        .download(&server.url("/missing.zip"), &local, &Shutdown::never())
        .await
        .unwrap_err();

    match find_steward_error(&err) {
        Some(StewardError::HttpStatus {
            status,
            ..
        }) => assert_eq!(*status, 404),
        other => panic!("expected HttpStatus, got {other:?}"),
    }
    assert!(!local.exists());
}

#[tokio::test]
async fn test_shutdown_cancels_download() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    server.publish_with(
        "/slow.zip",
        Served {
            body: b"late".to_vec(),
            content_disposition: None,
            delay: Some(Duration::from_secs(30)),
            status: None,
        },
    );

    let (handle, listener) = shutdown::channel();
    let local = temp.path().join("slow.zip");
    let fetcher = fetcher(CredentialSource::None, None);
    let url = server.url("/slow.zip");
    let download = fetcher.download(&url, &local, &listener);

    let trigger = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.trigger();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(download, trigger) })
        .await
        .expect("cancellation should be prompt");

    let err = result.unwrap_err();
    assert!(matches!(find_steward_error(&err), Some(StewardError::Cancelled { .. })));
    assert!(!local.exists());
}

#[tokio::test]
async fn test_relative_locator_without_base_is_config_error() {
    let temp = TempDir::new().unwrap();
    let err = fetcher(CredentialSource::None, None)
        .download("releases/svc.zip", &temp.path().join("svc.zip"), &Shutdown::never())
        .await
        .unwrap_err();
    assert!(matches!(find_steward_error(&err), Some(StewardError::ConfigError { .. })));
}

#[tokio::test]
async fn test_metadata_get_retries_server_errors() {
    let server = TestServer::start().await.unwrap();
    server.publish_with(
        "/metadata/targets.json",
        Served {
            status: Some(StatusCode::SERVICE_UNAVAILABLE),
            ..Served::default()
        },
    );

    let err = get_bytes(
        &reqwest::Client::new(),
        &server.url("/metadata/targets.json"),
        "targets metadata refresh",
        Duration::from_secs(10),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        find_steward_error(&err),
        Some(StewardError::HttpStatus { status: 503, .. })
    ));
    assert_eq!(server.request_count(), METADATA_FETCH_RETRIES + 1);
}

#[tokio::test]
async fn test_metadata_get_does_not_retry_not_found() {
    let server = TestServer::start().await.unwrap();

    let err = get_bytes(
        &reqwest::Client::new(),
        &server.url("/metadata/1.root.json"),
        "root metadata download",
        Duration::from_secs(10),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        find_steward_error(&err),
        Some(StewardError::HttpStatus { status: 404, .. })
    ));
    assert_eq!(server.request_count(), 1);
}

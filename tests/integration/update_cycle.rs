use crate::common::{
    NEW_VERSION, OLD_VERSION, SERVICE, Served, TestServer, http_engine, publish_release,
    release_archive, test_config,
};
use std::sync::Arc;
use std::time::Duration;
use steward::config::CredentialSource;
use steward::core::ErrorClass;
use steward::status::UpdateStatus;
use steward::test_utils::{RecordingLauncher, seed_installation};
use steward::upgrade::auth::TokenProvider;
use steward::upgrade::fetch::ArtifactFetcher;
use steward::upgrade::installation::InstallationRecord;
use steward::upgrade::shutdown::{self, Shutdown};
use steward::upgrade::{InstallState, InstallerRun, ServeExit};
use tempfile::TempDir;

fn staged_zips(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "zip"))
                .collect()
        })
        .unwrap_or_default()
}

/// Full cycle: check, request, install, handoff, and the successor's cleanup.
#[tokio::test]
async fn test_update_from_2023_to_2024() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let layout = seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 1);

    let launcher = Arc::new(RecordingLauncher::new());
    let engine = http_engine(test_config(temp.path(), &server), Arc::clone(&launcher));

    let report = engine.poller().tick().await.unwrap();
    assert!(report.update_available);
    assert_eq!(report.current.as_deref(), Some(OLD_VERSION));
    assert_eq!(report.candidate, NEW_VERSION);
    assert!(layout.root().join("metadata").join("root.json").exists());

    engine.status().request_update().await.unwrap();
    let run = engine.installer().run_once(&Shutdown::never()).await.unwrap();
    let InstallerRun::Completed(outcome) = run else {
        panic!("expected an install, got {run:?}");
    };
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    assert_eq!(
        outcome.transitions,
        vec![
            InstallState::Idle,
            InstallState::Staging,
            InstallState::Verified,
            InstallState::BackedUp,
            InstallState::Installed,
            InstallState::Restarted,
        ]
    );

    let launches = launcher.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].binary, layout.active_binary(SERVICE));
    assert_eq!(launches[0].args[0], "serve");
    assert!(layout.handoff_marker().exists());

    // The successor process confirms its startup.
    let successor = http_engine(test_config(temp.path(), &server), Arc::new(RecordingLauncher::new()));
    let state = successor.orchestrator().confirm_startup().await.unwrap();
    assert_eq!(state, InstallState::Cleaned);

    assert_eq!(std::fs::read(layout.active_binary(SERVICE)).unwrap(), b"new-binary");
    assert_eq!(std::fs::read(layout.previous_dir().join(SERVICE)).unwrap(), b"old-binary");
    assert!(!layout.retired_dir().exists());
    assert!(!layout.handoff_marker().exists());
    assert!(staged_zips(&layout.downloads_dir()).is_empty());
    assert_eq!(successor.status().read().await, UpdateStatus::default());

    let record = InstallationRecord::load(&layout.record_path()).await.unwrap();
    assert_eq!(record.current.unwrap().version_id, NEW_VERSION);
    assert_eq!(record.previous.unwrap().version_id, OLD_VERSION);

    // Nothing left to do.
    let run = successor.installer().run_once(&Shutdown::never()).await.unwrap();
    assert!(matches!(run, InstallerRun::NotRequested));
}

#[tokio::test]
async fn test_hash_mismatch_keeps_active_install() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let layout = seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), Some(&"0".repeat(64)), 1);

    let launcher = Arc::new(RecordingLauncher::new());
    let engine = http_engine(test_config(temp.path(), &server), Arc::clone(&launcher));
    assert!(engine.poller().tick().await.unwrap().update_available);
    engine.status().request_update().await.unwrap();

    let run = engine.installer().run_once(&Shutdown::never()).await.unwrap();
    let InstallerRun::Completed(outcome) = run else {
        panic!("expected an install attempt, got {run:?}");
    };
    assert_eq!(outcome.state, InstallState::Failed);
    assert_eq!(outcome.last_reached(), InstallState::Staging);
    assert_eq!(outcome.error_class, Some(ErrorClass::Integrity));

    assert_eq!(std::fs::read(layout.active_binary(SERVICE)).unwrap(), b"old-binary");
    assert!(!layout.previous_dir().exists());
    assert!(staged_zips(&layout.downloads_dir()).is_empty());
    assert!(launcher.launches().is_empty());

    let status = engine.status().read().await;
    assert!(status.update_requested);
    assert!(status.update_available);
    assert!(status.last_error.unwrap().contains("Checksum mismatch"));

    let record = InstallationRecord::load(&layout.record_path()).await.unwrap();
    assert_eq!(record.current.unwrap().version_id, OLD_VERSION);
}

#[tokio::test]
async fn test_missing_artifact_is_transient() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let layout = seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 1);
    server.remove(&format!("/artifacts/{SERVICE}-{NEW_VERSION}.zip"));

    let engine = http_engine(test_config(temp.path(), &server), Arc::new(RecordingLauncher::new()));
    engine.poller().tick().await.unwrap();
    engine.status().request_update().await.unwrap();

    let InstallerRun::Completed(outcome) =
        engine.installer().run_once(&Shutdown::never()).await.unwrap()
    else {
        panic!("expected an install attempt");
    };
    assert_eq!(outcome.state, InstallState::Failed);
    assert_eq!(outcome.error_class, Some(ErrorClass::Transient));
    assert_eq!(std::fs::read(layout.active_binary(SERVICE)).unwrap(), b"old-binary");

    let status = engine.status().read().await;
    assert!(status.update_requested);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_truncated_artifact_fails_size_check() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let layout = seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 1);
    server.publish(&format!("/artifacts/{SERVICE}-{NEW_VERSION}.zip"), b"PK".to_vec());

    let engine = http_engine(test_config(temp.path(), &server), Arc::new(RecordingLauncher::new()));
    engine.poller().tick().await.unwrap();
    engine.status().request_update().await.unwrap();

    let InstallerRun::Completed(outcome) =
        engine.installer().run_once(&Shutdown::never()).await.unwrap()
    else {
        panic!("expected an install attempt");
    };
    assert_eq!(outcome.error_class, Some(ErrorClass::Integrity));
    assert!(outcome.error.unwrap().contains("Size mismatch"));
    assert!(staged_zips(&layout.downloads_dir()).is_empty());
    assert_eq!(std::fs::read(layout.active_binary(SERVICE)).unwrap(), b"old-binary");
}

#[tokio::test]
async fn test_second_tick_uses_cached_descriptor() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 1);

    let engine = http_engine(test_config(temp.path(), &server), Arc::new(RecordingLauncher::new()));
    let first = engine.poller().tick().await.unwrap();
    assert!(!first.cache_hit);
    assert!(first.status_changed);

    let second = engine.poller().tick().await.unwrap();
    assert!(second.cache_hit);
    assert!(second.update_available);
    assert!(!second.status_changed);
}

#[tokio::test]
async fn test_targets_version_rollback_rejected() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 5);

    let engine = http_engine(test_config(temp.path(), &server), Arc::new(RecordingLauncher::new()));
    engine.poller().tick().await.unwrap();

    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 4);
    let err = engine.poller().tick().await.unwrap_err();
    assert!(format!("{err:#}").contains("went backwards"));
}

#[tokio::test]
async fn test_serve_hands_off_after_request() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let layout = seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new-binary"), None, 1);

    let launcher = Arc::new(RecordingLauncher::new());
    let engine = http_engine(test_config(temp.path(), &server), Arc::clone(&launcher));
    engine.status().request_update().await.unwrap();

    let (handle, listener) = shutdown::channel();
    let exit = tokio::time::timeout(Duration::from_secs(20), engine.serve(listener))
        .await
        .expect("serve should hand off")
        .unwrap();
    drop(handle);

    let ServeExit::HandedOff(outcome) = exit else {
        panic!("expected a handoff, got {exit:?}");
    };
    assert_eq!(outcome.version, NEW_VERSION);
    assert_eq!(launcher.launches().len(), 1);
    assert_eq!(std::fs::read(layout.active_binary(SERVICE)).unwrap(), b"new-binary");
}

/// A server-suggested file name stays inside `staging/downloads/`.
#[tokio::test]
async fn test_download_name_cannot_replace_handoff_marker() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    let layout = seed_installation(temp.path(), SERVICE, b"old-binary", OLD_VERSION).await.unwrap();
    let archive = release_archive(b"new-binary");
    publish_release(&server, NEW_VERSION, &archive, None, 1);
    server.publish_with(
        &format!("/artifacts/{SERVICE}-{NEW_VERSION}.zip"),
        Served {
            body: archive,
            content_disposition: Some(r#"attachment; filename="handoff.json""#.to_string()),
            ..Served::default()
        },
    );

    // A marker left behind by an earlier, unconfirmed handoff.
    std::fs::create_dir_all(layout.staging_dir()).unwrap();
    std::fs::write(layout.handoff_marker(), b"earlier-marker").unwrap();

    let engine = http_engine(test_config(temp.path(), &server), Arc::new(RecordingLauncher::new()));
    engine.poller().tick().await.unwrap();

    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(10);
    let fetcher = ArtifactFetcher::new(
        client.clone(),
        TokenProvider::new(CredentialSource::None, client, timeout),
        None,
        timeout,
    );
    let staged = fetcher
        .download(
            &server.url(&format!("/artifacts/{SERVICE}-{NEW_VERSION}.zip")),
            &layout.downloads_dir().join("svc.zip"),
            &Shutdown::never(),
        )
        .await
        .unwrap();
    assert_eq!(staged.path, layout.downloads_dir().join("handoff.json"));
    assert_eq!(std::fs::read(layout.handoff_marker()).unwrap(), b"earlier-marker");
    std::fs::remove_file(&staged.path).unwrap();

    engine.status().request_update().await.unwrap();
    let run = engine.installer().run_once(&Shutdown::never()).await.unwrap();
    let InstallerRun::Completed(outcome) = run else {
        panic!("expected an install, got {run:?}");
    };
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    assert_eq!(std::fs::read(layout.active_binary(SERVICE)).unwrap(), b"new-binary");
    assert!(!layout.downloads_dir().join("handoff.json").exists());
}

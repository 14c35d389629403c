use crate::common::{NEW_VERSION, OLD_VERSION, SERVICE, TestServer, publish_release, release_archive};
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use steward::test_utils::seed_installation;
use tempfile::TempDir;

fn write_config(dir: &Path, metadata_url: &str) -> PathBuf {
    write_config_with_targets(dir, metadata_url, None)
}

fn write_config_with_targets(dir: &Path, metadata_url: &str, targets_url: Option<&str>) -> PathBuf {
    let path = dir.join("steward.toml");
    let targets = targets_url.map(|url| format!("targets_url = \"{url}\"\n")).unwrap_or_default();
    std::fs::write(
        &path,
        format!(
            "service = \"{SERVICE}\"\ninstall_root = \"install\"\nmetadata_url = \"{metadata_url}\"\n{targets}\n[upgrade]\nrequest_timeout = 10\n"
        ),
    )
    .unwrap();
    path
}

fn steward(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("steward").unwrap();
    cmd.env_remove("STEWARD_CONFIG").env("NO_COLOR", "1").arg("--config").arg(config);
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("steward")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("rollback"));
}

#[test]
fn test_missing_config_exits_with_error() {
    let temp = TempDir::new().unwrap();
    steward(&temp.path().join("absent.toml"))
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_invalid_metadata_url_rejected() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "ftp://updates.example.com");
    steward(&config)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("metadata_url must be an http(s) URL"));
}

#[test]
fn test_request_writes_status_file() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "https://updates.example.com/metadata");

    steward(&config)
        .arg("request")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"success":true}"#));

    let status: serde_json::Value = serde_json::from_slice(
        &std::fs::read(temp.path().join("install").join("status.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(status["update_requested"], 1);
    assert_eq!(status["update_available"], 0);
}

#[tokio::test]
async fn test_status_json_reports_installed_version() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "https://updates.example.com/metadata");
    seed_installation(&temp.path().join("install"), SERVICE, b"bin", OLD_VERSION).await.unwrap();

    let output = steward(&config).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["service"], SERVICE);
    assert_eq!(report["current"]["version_id"], OLD_VERSION);
    assert_eq!(report["status"]["update_requested"], 0);
}

/// The release is a shell script so the successor launch really succeeds.
#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_request_install_over_http() {
    const SUCCESSOR: &[u8] = b"#!/bin/sh\nexit 0\n";

    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(SUCCESSOR), None, 1);
    let config = write_config_with_targets(temp.path(), &server.url("/metadata"), Some(&server.url("/targets")));
    let install_root = temp.path().join("install");
    seed_installation(&install_root, SERVICE, b"old", OLD_VERSION).await.unwrap();

    let run = |args: &'static [&'static str]| {
        let config = config.clone();
        tokio::task::spawn_blocking(move || steward(&config).args(args).output().unwrap())
    };

    let check = run(&["check"]).await.unwrap();
    assert!(check.status.success(), "{}", String::from_utf8_lossy(&check.stderr));
    assert!(String::from_utf8_lossy(&check.stdout).contains("Update available"));

    // Without a request the installer does nothing.
    let install = run(&["install"]).await.unwrap();
    assert!(install.status.success());
    assert!(String::from_utf8_lossy(&install.stdout).contains("No update requested"));
    assert_eq!(std::fs::read(install_root.join("active").join(SERVICE)).unwrap(), b"old");

    let request = run(&["request"]).await.unwrap();
    assert!(request.status.success(), "{}", String::from_utf8_lossy(&request.stderr));

    let install = run(&["install"]).await.unwrap();
    assert!(install.status.success(), "{}", String::from_utf8_lossy(&install.stderr));
    assert!(String::from_utf8_lossy(&install.stdout).contains(&format!("Installed {NEW_VERSION}")));
    assert_eq!(std::fs::read(install_root.join("active").join(SERVICE)).unwrap(), SUCCESSOR);
    assert_eq!(std::fs::read(install_root.join("previous").join(SERVICE)).unwrap(), b"old");
}

/// A bad checksum makes `install` exit non-zero and leaves the old binary active.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_install_reports_checksum_failure() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start().await.unwrap();
    publish_release(&server, NEW_VERSION, &release_archive(b"new"), Some(&"0".repeat(64)), 1);
    let config = write_config_with_targets(temp.path(), &server.url("/metadata"), Some(&server.url("/targets")));
    let install_root = temp.path().join("install");
    seed_installation(&install_root, SERVICE, b"old", OLD_VERSION).await.unwrap();

    let check_config = config.clone();
    let check = tokio::task::spawn_blocking(move || steward(&check_config).arg("check").output().unwrap())
        .await
        .unwrap();
    assert!(check.status.success(), "{}", String::from_utf8_lossy(&check.stderr));

    let install = tokio::task::spawn_blocking(move || {
        steward(&config).args(["install", "--request"]).output().unwrap()
    })
    .await
    .unwrap();
    assert_eq!(install.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&install.stderr);
    assert!(stderr.contains("stopped after staging"), "{stderr}");
    assert!(stderr.contains("Checksum mismatch"), "{stderr}");
    assert_eq!(std::fs::read(install_root.join("active").join(SERVICE)).unwrap(), b"old");
}

#[tokio::test]
async fn test_rollback_without_previous_fails() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "https://updates.example.com/metadata");
    seed_installation(&temp.path().join("install"), SERVICE, b"bin", OLD_VERSION).await.unwrap();

    steward(&config)
        .arg("rollback")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No previous installation"));
}

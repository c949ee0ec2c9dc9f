//! End-to-end CLI tests for the rdown binary.
#![allow(deprecated)]

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn rdown(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rdown").unwrap();
    cmd.arg("--config")
        .arg(config_dir.path().join("missing.toml"))
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("rdown").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pause, resume and cancel"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("rdown").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rdown"));
}

/// A URL is required.
#[test]
fn test_binary_without_urls_returns_error() {
    let mut cmd = Command::cargo_bin("rdown").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("URL"));
}

#[test]
fn test_binary_rejects_out_of_range_timeout() {
    let mut cmd = Command::cargo_bin("rdown").unwrap();
    cmd.args(["--connect-timeout", "0", "https://example.com/a.bin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_json_run_downloads_file() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
        .mount(&mock_server)
        .await;
    let out = TempDir::new().unwrap();
    let config = TempDir::new().unwrap();
    let url = format!("{}/report.pdf", mock_server.uri());

    let mut cmd = rdown(&config);
    cmd.args(["--json", "-q", "-o"]).arg(out.path()).arg(&url);
    let assert = tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("\"type\":\"started\""))
        .stdout(predicate::str::contains("\"type\":\"complete\""))
        .stdout(predicate::str::contains("\"fileName\":\"report.pdf\""));
    assert_eq!(
        std::fs::read(out.path().join("Downloads/report.pdf")).unwrap(),
        b"%PDF-1.4 body"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_failed_download_exits_non_zero() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    let out = TempDir::new().unwrap();
    let config = TempDir::new().unwrap();
    let url = format!("{}/gone.bin", mock_server.uri());

    let mut cmd = rdown(&config);
    cmd.args(["--json", "-o"])
        .arg(out.path())
        .args(["-s", "Files", "-n", "kept.bin"])
        .arg(&url);
    let assert = tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap();

    assert
        .failure()
        .stdout(predicate::str::contains("\"type\":\"error\""))
        .stdout(predicate::str::contains("\"fileName\":\"kept.bin\""))
        .stdout(predicate::str::contains("\"subdirectory\":\"Files\""));
    assert!(out.path().join("Files/kept.bin.part").exists());
}

//! Exchanges with a stand-in git binary that misbehaves on purpose.
//!
//! The repository itself is created with the real git so resolution
//! succeeds; only the RPC runs the stand-in.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serial_test::serial;

use git_http_bridge::events::EventKind;
use git_http_bridge::pktline::{flush_packet, write_packet};
use git_http_bridge::{AppError, GitHttp};

use super::test_helpers::{config_for, eventually, git_or_skip, init_bare, Collected, TestServer};

const WANT: &str = "3f786850e387550fdab836ed7e6dc881de23001b";

/// Error band on channel 3 followed by a flush, then a clean exit.
const BAND_ERROR: &str = r"#!/bin/sh
cat > /dev/null
printf '0013\003fatal: broken\n0000'
exit 0
";

/// Reads the request and fails without output.
const EXIT_FAILURE: &str = r"#!/bin/sh
cat > /dev/null
exit 3
";

fn stand_in(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("fake-git");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fetch_body() -> Vec<u8> {
    let mut body = write_packet(&format!("want {WANT}"));
    body.extend_from_slice(&flush_packet());
    body.extend_from_slice(&write_packet("done"));
    body
}

async fn exchange(script: &str) -> (StatusCode, Vec<u8>, Collected) {
    let tool = git_or_skip().expect("callers check for git");
    let root = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    init_bare(&root.path().join("proj"));

    let mut config = config_for(root.path(), &tool);
    config.git_bin_path = Some(stand_in(bin.path(), script));
    config.upload_pack = Some(true);
    let collected = Collected::default();
    let server = TestServer::start(
        GitHttp::new(config)
            .unwrap()
            .with_event_sink(collected.sink()),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(server.url("/proj/git-upload-pack"))
        .header(CONTENT_TYPE, "application/x-git-upload-pack-request")
        .body(fetch_body())
        .send()
        .await
        .unwrap();
    let status = resp.status();
    let body = resp.bytes().await.unwrap().to_vec();
    assert!(eventually(|| !collected.events().is_empty()).await);
    (status, body, collected)
}

#[tokio::test]
#[serial]
async fn error_band_fails_the_event_despite_clean_exit() {
    if git_or_skip().is_none() {
        return;
    }
    let (status, body, collected) = exchange(BAND_ERROR).await;

    // Committed before the failure was known; the output is passed on as is.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"0013\x03fatal: broken\n0000");

    let events = collected.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Fetch);
    assert_eq!(events[0].commit, WANT);
    let error = events[0].error.as_deref().expect("exchange error");
    assert!(matches!(error, AppError::Tool(msg) if msg == "fatal: broken"));
}

#[tokio::test]
#[serial]
async fn non_zero_exit_fails_the_event() {
    if git_or_skip().is_none() {
        return;
    }
    let (status, body, collected) = exchange(EXIT_FAILURE).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    let events = collected.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0].error.as_deref(),
        Some(AppError::Tool(msg)) if msg.contains("exited")
    ));
}

#[tokio::test]
#[serial]
async fn denied_push_never_starts_git() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    init_bare(&root.path().join("proj"));
    let marker = bin.path().join("receive-pack-ran");
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = receive-pack ]; then touch '{}'; fi\ncat > /dev/null\nexit 0\n",
        marker.display()
    );

    let mut config = config_for(root.path(), &tool);
    config.git_bin_path = Some(stand_in(bin.path(), &script));
    config.receive_pack = Some(false);
    let collected = Collected::default();
    let server = TestServer::start(
        GitHttp::new(config)
            .unwrap()
            .with_event_sink(collected.sink()),
    )
    .await;

    let resp = reqwest::Client::new()
        .post(server.url("/proj/git-receive-pack"))
        .header(CONTENT_TYPE, "application/x-git-receive-pack-request")
        .body(flush_packet())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    resp.bytes().await.unwrap();

    assert!(!marker.exists());
    assert!(collected.events().is_empty());
}

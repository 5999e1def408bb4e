//! End-to-end tests of the smart protocol against a real git binary.

use std::sync::Arc;

use reqwest::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;

use git_http_bridge::events::EventKind;
use git_http_bridge::pktline::{flush_packet, write_packet};
use git_http_bridge::repo::{Preprocessor, ProcessParams};
use git_http_bridge::{AppError, GitHttp, Result};

use super::test_helpers::{
    config_for, eventually, git, git_or_skip, init_bare, repo_with_commit, Collected, TestServer,
};

#[tokio::test]
async fn first_advertisement_creates_a_bare_repository() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), &tool);
    config.auto_create = true;
    let server = TestServer::start(GitHttp::new(config).unwrap()).await;

    let resp = reqwest::get(server.url("/team/proj/info/refs?service=git-upload-pack"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[CONTENT_TYPE],
        "application/x-git-upload-pack-advertisement"
    );
    assert_eq!(
        resp.headers()[CACHE_CONTROL],
        "no-cache, max-age=0, must-revalidate"
    );
    let body = resp.bytes().await.unwrap();
    assert!(body.starts_with(b"001e# service=git-upload-pack\n0000"));

    let repo = root.path().join("team/proj");
    assert!(repo.join("HEAD").is_file());
    assert!(!repo.join(".git").exists());
}

#[tokio::test]
async fn working_tree_layout_when_bare_is_disabled() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), &tool);
    config.auto_create = true;
    config.no_bare = true;
    let server = TestServer::start(GitHttp::new(config).unwrap()).await;

    let resp = reqwest::get(server.url("/proj/info/refs?service=git-upload-pack"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(root.path().join("proj/.git/HEAD").is_file());
}

#[tokio::test]
async fn missing_repository_is_not_found_without_auto_create() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let server = TestServer::start(GitHttp::new(config_for(root.path(), &tool)).unwrap()).await;

    let resp = reqwest::get(server.url("/absent/info/refs?service=git-upload-pack"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(!root.path().join("absent").exists());
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let server = TestServer::start(GitHttp::new(config_for(root.path(), &tool)).unwrap()).await;

    let resp = reqwest::get(server.url("/proj/description")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_on_an_rpc_endpoint_is_method_not_allowed() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), &tool);
    config.auto_create = true;
    let server = TestServer::start(GitHttp::new(config).unwrap()).await;

    let resp = reqwest::get(server.url("/proj/git-upload-pack")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()[ALLOW], "POST");
    // Rejected before resolution: nothing was created.
    assert!(!root.path().join("proj").exists());
}

#[tokio::test]
async fn push_denied_while_fetch_allowed() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    init_bare(&root.path().join("proj"));
    let mut config = config_for(root.path(), &tool);
    config.upload_pack = Some(true);
    config.receive_pack = Some(false);
    let collected = Collected::default();
    let server = TestServer::start(
        GitHttp::new(config)
            .unwrap()
            .with_event_sink(collected.sink()),
    )
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/proj/git-receive-pack"))
        .header(CONTENT_TYPE, "application/x-git-receive-pack-request")
        .body(flush_packet())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .post(server.url("/proj/git-upload-pack"))
        .header(CONTENT_TYPE, "application/x-git-upload-pack-request")
        .body(flush_packet())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[CONTENT_TYPE],
        "application/x-git-upload-pack-result"
    );
    assert_eq!(
        resp.headers()[CACHE_CONTROL],
        "no-cache, max-age=0, must-revalidate"
    );
    resp.bytes().await.unwrap();

    assert!(collected.events().is_empty());
}

#[tokio::test]
async fn wrong_request_content_type_is_forbidden() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    init_bare(&root.path().join("proj"));
    let mut config = config_for(root.path(), &tool);
    config.upload_pack = Some(true);
    let server = TestServer::start(GitHttp::new(config).unwrap()).await;

    let resp = reqwest::Client::new()
        .post(server.url("/proj/git-upload-pack"))
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(flush_packet())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn repository_config_enables_push() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let repo = root.path().join("proj");
    init_bare(&repo);
    git(&repo, &["config", "http.receivepack", "true"]);
    let server = TestServer::start(GitHttp::new(config_for(root.path(), &tool)).unwrap()).await;

    let resp = reqwest::get(server.url("/proj/info/refs?service=git-receive-pack"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[CONTENT_TYPE],
        "application/x-git-receive-pack-advertisement"
    );
}

#[tokio::test]
async fn push_and_clone_round_trip_with_events() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), &tool);
    config.auto_create = true;
    config.receive_pack = Some(true);
    let collected = Collected::default();
    let server = TestServer::start(
        GitHttp::new(config)
            .unwrap()
            .with_event_sink(collected.sink()),
    )
    .await;

    let work = scratch.path().join("work");
    let commit = repo_with_commit(&work);
    let remote = server.url("/team/proj.git");

    let push_remote = remote.clone();
    tokio::task::spawn_blocking(move || git(&work, &["push", push_remote.as_str(), "main"]))
        .await
        .unwrap();

    assert!(eventually(|| !collected.events().is_empty()).await);
    let pushed = collected.events();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].kind, EventKind::Push);
    assert_eq!(pushed[0].branch.as_deref(), Some("main"));
    assert_eq!(pushed[0].commit, commit);
    assert!(pushed[0].error.is_none());
    assert_eq!(pushed[0].dir, root.path().join("team/proj.git"));
    assert!(pushed[0].request.is_some());

    let clone_dir = scratch.path().join("clone");
    let clone_target = clone_dir.to_string_lossy().into_owned();
    let parent = scratch.path().to_path_buf();
    tokio::task::spawn_blocking(move || git(&parent, &["clone", remote.as_str(), clone_target.as_str()]))
        .await
        .unwrap();
    assert_eq!(git(&clone_dir, &["rev-parse", "HEAD"]), commit);

    assert!(eventually(|| collected.events().len() > 1).await);
    let fetched: Vec<_> = collected
        .events()
        .into_iter()
        .filter(|event| event.kind == EventKind::Fetch)
        .collect();
    assert!(fetched.iter().any(|event| event.commit == commit));
}

#[tokio::test]
async fn fetch_request_is_streamed_back() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let repo = root.path().join("proj");
    let seed = scratch.path().join("seed");
    let commit = repo_with_commit(&seed);
    let seed = seed.to_string_lossy().into_owned();
    let target = repo.to_string_lossy().into_owned();
    git(root.path(), &["clone", "--bare", seed.as_str(), target.as_str()]);
    let collected = Collected::default();
    let server = TestServer::start(
        GitHttp::new(config_for(root.path(), &tool))
            .unwrap()
            .with_event_sink(collected.sink()),
    )
    .await;

    let mut body = write_packet(&format!("want {commit} ofs-delta"));
    body.extend_from_slice(&flush_packet());
    body.extend_from_slice(&write_packet("done"));
    let resp = reqwest::Client::new()
        .post(server.url("/proj/git-upload-pack"))
        .header(CONTENT_TYPE, "application/x-git-upload-pack-request")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(b"0008NAK\n"));
    assert!(bytes.windows(4).any(|window| window == b"PACK"));

    assert!(eventually(|| !collected.events().is_empty()).await);
    let events = collected.events();
    assert_eq!(events[0].kind, EventKind::Fetch);
    assert_eq!(events[0].commit, commit);
    assert!(events[0].error.is_none());
}

#[tokio::test]
async fn rejected_hook_path_is_not_found() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), &tool);
    config.auto_create = true;
    let hook = Preprocessor::none().with_path(|raw: &str| -> Result<String> {
        if raw.starts_with("/private") {
            Err(AppError::Hook(format!("{raw} is private")))
        } else {
            Ok(raw.to_owned())
        }
    });
    let server = TestServer::start(GitHttp::new(config).unwrap().with_preprocessor(hook)).await;

    let resp = reqwest::get(server.url("/private/proj/info/refs?service=git-upload-pack"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(!root.path().join("private").exists());

    let resp = reqwest::get(server.url("/public/proj/info/refs?service=git-upload-pack"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn hook_failure_keeps_the_created_repository() {
    let Some(tool) = git_or_skip() else { return };
    let root = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), &tool);
    config.auto_create = true;
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let hook = Preprocessor::none().with_process(move |params: &ProcessParams<'_>| -> Result<()> {
        record.lock().unwrap().push(params.is_new);
        Err(AppError::Hook("quota exceeded".into()))
    });
    let server = TestServer::start(GitHttp::new(config).unwrap().with_preprocessor(hook)).await;

    let resp = reqwest::get(server.url("/proj/info/refs?service=git-upload-pack"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(root.path().join("proj/HEAD").is_file());
    assert_eq!(*seen.lock().unwrap(), vec![true]);
}

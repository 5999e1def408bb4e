//! Unit tests for error display and status mapping.

use std::io;
use std::path::PathBuf;

use axum::http::StatusCode;

use git_http_bridge::AppError;

#[test]
fn display_prefixes_the_kind() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Tool("exit 128".into()).to_string(), "tool: exit 128");
    assert_eq!(
        AppError::NoAccess(PathBuf::from("/srv/git/proj")).to_string(),
        "could not access repo at '/srv/git/proj'"
    );
}

#[test]
fn status_mapping() {
    assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    assert_eq!(AppError::Resolution("x".into()).status(), StatusCode::NOT_FOUND);
    assert_eq!(AppError::Hook("x".into()).status(), StatusCode::NOT_FOUND);
    assert_eq!(
        AppError::NoAccess(PathBuf::new()).status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        AppError::Tool("x".into()).status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn missing_files_become_not_found() {
    let err = AppError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
    assert!(err.is_not_found());

    let err = AppError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
    assert!(matches!(err, AppError::Io(_)));
}

#[test]
fn toml_errors_become_config_errors() {
    let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    assert!(matches!(AppError::from(err), AppError::Config(msg) if msg.starts_with("invalid config")));
}

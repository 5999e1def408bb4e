//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

use axum::http::StatusCode;

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure modes of the bridge, from startup configuration to a single
/// RPC exchange.
#[derive(Debug)]
pub enum AppError {
    /// Missing or invalid configuration; fatal at startup.
    Config(String),
    /// Repository path could not be mapped to a local directory.
    Resolution(String),
    /// Requested repository or file does not exist.
    NotFound(String),
    /// Operation is not permitted on the repository at this directory.
    NoAccess(PathBuf),
    /// The preprocessing hook rejected the request.
    Hook(String),
    /// The git binary failed or reported an error band.
    Tool(String),
    /// Malformed pkt-line framing.
    Protocol(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl AppError {
    /// HTTP status the router answers with when a handler fails with this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::Resolution(_) | Self::Hook(_) => StatusCode::NOT_FOUND,
            Self::NoAccess(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Tool(_) | Self::Protocol(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this error means the requested path is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Resolution(msg) => write!(f, "resolution: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::NoAccess(dir) => write!(f, "could not access repo at '{}'", dir.display()),
            Self::Hook(msg) => write!(f, "hook: {msg}"),
            Self::Tool(msg) => write!(f, "tool: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

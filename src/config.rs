//! Server configuration parsing and validation.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::access::AccessRules;
use crate::repo::Layout;
use crate::{AppError, Result};

/// Configuration of one served project root.
///
/// ```toml
/// project_root = "/srv/git"
/// auto_create = true
/// receive_pack = true
/// bind = "0.0.0.0:8080"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Directory containing the served repositories. Required and
    /// non-empty.
    pub project_root: PathBuf,
    /// Explicit git binary; discovered on `PATH` when unset.
    #[serde(default)]
    pub git_bin_path: Option<PathBuf>,
    /// Static permission for fetch and clone; unset defers to each
    /// repository's `http.uploadpack`.
    #[serde(default)]
    pub upload_pack: Option<bool>,
    /// Static permission for push; unset defers to each repository's
    /// `http.receivepack`.
    #[serde(default)]
    pub receive_pack: Option<bool>,
    /// Create missing repositories on first request.
    #[serde(default)]
    pub auto_create: bool,
    /// Auto-created repositories get a working tree instead of being bare.
    #[serde(default)]
    pub no_bare: bool,
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl ServerConfig {
    /// Defaults for serving `project_root`.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            git_bin_path: None,
            upload_pack: None,
            receive_pack: None,
            auto_create: false,
            no_bare: false,
            bind: default_bind(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or is invalid.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the root is empty or names a file, or
    /// if the git binary path is empty.
    pub fn validate(&self) -> Result<()> {
        if self.project_root.as_os_str().is_empty() {
            return Err(AppError::Config("project_root must not be empty".into()));
        }
        if self.project_root.is_file() {
            return Err(AppError::Config(format!(
                "project_root {} is a file",
                self.project_root.display()
            )));
        }
        if self
            .git_bin_path
            .as_ref()
            .is_some_and(|bin| bin.as_os_str().is_empty())
        {
            return Err(AppError::Config("git_bin_path must not be empty".into()));
        }
        Ok(())
    }

    /// The static access permissions.
    #[must_use]
    pub fn access_rules(&self) -> AccessRules {
        AccessRules {
            upload_pack: self.upload_pack,
            receive_pack: self.receive_pack,
        }
    }

    /// Layout of auto-created repositories.
    #[must_use]
    pub fn layout(&self) -> Layout {
        if self.no_bare {
            Layout::WorkingTree
        } else {
            Layout::Bare
        }
    }
}

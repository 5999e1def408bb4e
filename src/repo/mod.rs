//! Repository resolution and lifecycle.
//!
//! Maps the repository part of a URL to a directory under the project
//! root, opening the repository there or creating it when auto-create is
//! enabled, and runs the [`Preprocessor`] hook on the result.
//!
//! A new repository is initialized in a hidden sibling directory and
//! renamed into place, so concurrent requests never see a half-initialized
//! repository. When two requests race to create the same path, the rename
//! of the slower one fails, it discards its copy and continues with the
//! winner's repository as an existing one.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::tool::GitTool;
use crate::{AppError, Result};

pub mod hook;

pub use hook::{PathResolver, Preprocessor, ProcessParams, RepositoryProcessor};

/// Whether the resolved repository existed before the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// Found on disk.
    Existing,
    /// Created by this request.
    Created,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    /// Repository path from the URL.
    pub public_path: String,
    /// Absolute local directory.
    pub local_path: PathBuf,
    /// Directory holding the repository's internals.
    pub git_dir: PathBuf,
    /// Whether the repository was created by this request.
    pub existence: Existence,
}

/// Repository layout used for auto-created repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Objects and refs only, no working tree.
    Bare,
    /// A working tree with a `.git` directory.
    WorkingTree,
}

/// Resolves public repository paths to local repositories.
#[derive(Debug, Clone)]
pub struct RepositoryResolver {
    root: PathBuf,
    auto_create: bool,
    layout: Layout,
    tool: GitTool,
    hook: Preprocessor,
}

impl RepositoryResolver {
    /// Resolver serving repositories under `root`.
    ///
    /// An empty `root` fails every resolution.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, tool: GitTool) -> Self {
        Self {
            root: root.into(),
            auto_create: false,
            layout: Layout::Bare,
            tool,
            hook: Preprocessor::none(),
        }
    }

    /// Create missing repositories on first request.
    #[must_use]
    pub fn auto_create(mut self, enabled: bool, layout: Layout) -> Self {
        self.auto_create = enabled;
        self.layout = layout;
        self
    }

    /// Install the preprocessing hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Preprocessor) -> Self {
        self.hook = hook;
        self
    }

    /// Resolve `public_path` to a local repository.
    ///
    /// Blocking: touches the file system and may run `git init`.
    ///
    /// # Errors
    ///
    /// - `AppError::Resolution` if the root is empty, the path
    ///   escapes the root, or the directory is not a repository.
    /// - `AppError::NotFound` if the repository is missing and auto-create
    ///   is disabled.
    /// - The hook's error if the hook rejects the request. A repository
    ///   created by this request stays on disk in that case.
    pub fn resolve(&self, public_path: &str) -> Result<ResolvedRepository> {
        let root = self.storage_root()?;
        let subpath = self.hook.resolve_path(public_path)?;
        let local_path = join_within_root(&root, &subpath)?;

        let (repository, existence) = if local_path.exists() {
            (open(&local_path)?, Existence::Existing)
        } else if self.auto_create {
            self.create(&local_path)?
        } else {
            return Err(AppError::NotFound(format!(
                "no repository at {}",
                local_path.display()
            )));
        };

        let params = ProcessParams {
            repository_path: public_path,
            local_path: &local_path,
            is_new: existence == Existence::Created,
            repository: &repository,
        };
        if let Err(err) = self.hook.process(&params) {
            if existence == Existence::Created {
                warn!(
                    dir = %local_path.display(),
                    %err,
                    "hook rejected a newly created repository; leaving it on disk"
                );
            }
            return Err(err);
        }

        Ok(ResolvedRepository {
            public_path: public_path.to_owned(),
            git_dir: repository.git_dir().to_path_buf(),
            local_path,
            existence,
        })
    }

    fn storage_root(&self) -> Result<PathBuf> {
        if self.root.as_os_str().is_empty() {
            return Err(AppError::Resolution("no project root configured".into()));
        }
        Ok(self.root.clone())
    }

    fn create(&self, local_path: &Path) -> Result<(gix::Repository, Existence)> {
        let parent = local_path
            .parent()
            .ok_or_else(|| AppError::Resolution("cannot create the project root".into()))?;
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Io(format!("failed to create {}: {err}", parent.display()))
        })?;

        let staging = tempfile::Builder::new()
            .prefix(".init-")
            .tempdir_in(parent)
            .map_err(|err| AppError::Io(format!("failed to stage repository: {err}")))?;
        self.tool
            .init_blocking(staging.path(), self.layout == Layout::Bare)?;

        match fs::rename(staging.path(), local_path) {
            Ok(()) => {
                // Nothing left at the staging path for the guard to remove.
                drop(staging);
                info!(dir = %local_path.display(), layout = ?self.layout, "created repository");
                Ok((open(local_path)?, Existence::Created))
            }
            Err(err) if local_path.exists() => {
                debug!(%err, dir = %local_path.display(), "repository created concurrently");
                Ok((open(local_path)?, Existence::Existing))
            }
            Err(err) => Err(AppError::Io(format!(
                "failed to move repository into {}: {err}",
                local_path.display()
            ))),
        }
    }
}

fn open(local_path: &Path) -> Result<gix::Repository> {
    gix::open(local_path).map_err(|err| {
        AppError::Resolution(format!(
            "{} is not a git repository: {err}",
            local_path.display()
        ))
    })
}

/// Join `subpath` onto `root`, refusing paths that climb out of it.
///
/// Leading slashes are ignored and `.` segments dropped.
///
/// # Errors
///
/// Returns `AppError::Resolution` if `..` segments escape `root`.
pub fn join_within_root(root: &Path, subpath: &str) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(subpath).components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::Resolution(format!(
                        "repository path {subpath:?} escapes the project root"
                    )));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(root.join(normalized))
}

//! Preprocessing hook invoked while a repository is resolved.
//!
//! The hook has two independent capabilities, each optional:
//!
//! - a [`PathResolver`] that maps the public repository path from the URL
//!   to the subpath under the project root, and may reject it;
//! - a [`RepositoryProcessor`] that runs once the repository is open
//!   (or freshly created) and may fail the request.
//!
//! [`Preprocessor::none`] is the null hook: paths are used verbatim and no
//! processing happens. Closures implement both traits.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use crate::Result;

/// Arguments handed to a [`RepositoryProcessor`].
pub struct ProcessParams<'a> {
    /// Repository path as it appeared in the URL.
    pub repository_path: &'a str,
    /// Local directory of the repository.
    pub local_path: &'a Path,
    /// Whether the repository was created by this request.
    pub is_new: bool,
    /// The opened repository.
    pub repository: &'a gix::Repository,
}

/// Maps a public repository path to a subpath of the project root.
pub trait PathResolver: Send + Sync {
    /// Return the target subpath for `raw_path`, or an error to reject it.
    ///
    /// # Errors
    ///
    /// Any error aborts resolution and the request is answered `404`.
    fn resolve_path(&self, raw_path: &str) -> Result<String>;
}

/// Validates or post-processes a resolved repository.
pub trait RepositoryProcessor: Send + Sync {
    /// Inspect or modify the repository described by `params`.
    ///
    /// # Errors
    ///
    /// Any error aborts resolution and the request is answered `404`.
    fn process(&self, params: &ProcessParams<'_>) -> Result<()>;
}

impl<F> PathResolver for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn resolve_path(&self, raw_path: &str) -> Result<String> {
        self(raw_path)
    }
}

impl<F> RepositoryProcessor for F
where
    F: Fn(&ProcessParams<'_>) -> Result<()> + Send + Sync,
{
    fn process(&self, params: &ProcessParams<'_>) -> Result<()> {
        self(params)
    }
}

/// The configured pair of hook capabilities.
#[derive(Clone, Default)]
pub struct Preprocessor {
    path: Option<Arc<dyn PathResolver>>,
    process: Option<Arc<dyn RepositoryProcessor>>,
}

impl Preprocessor {
    /// A hook that does nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the path resolution capability.
    #[must_use]
    pub fn with_path(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.path = Some(Arc::new(resolver));
        self
    }

    /// Set the post-resolution capability.
    #[must_use]
    pub fn with_process(mut self, processor: impl RepositoryProcessor + 'static) -> Self {
        self.process = Some(Arc::new(processor));
        self
    }

    /// Whether a path resolver is configured.
    #[must_use]
    pub fn has_path(&self) -> bool {
        self.path.is_some()
    }

    /// Whether a processor is configured.
    #[must_use]
    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Map `raw_path`, or return it unchanged when no resolver is set.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's rejection.
    pub fn resolve_path(&self, raw_path: &str) -> Result<String> {
        match &self.path {
            Some(resolver) => resolver.resolve_path(raw_path),
            None => Ok(raw_path.to_owned()),
        }
    }

    /// Run the processor, if one is set.
    ///
    /// # Errors
    ///
    /// Propagates the processor's failure.
    pub fn process(&self, params: &ProcessParams<'_>) -> Result<()> {
        match &self.process {
            Some(processor) => processor.process(params),
            None => Ok(()),
        }
    }
}

impl Debug for Preprocessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessor")
            .field("path", &self.has_path())
            .field("process", &self.has_process())
            .finish()
    }
}

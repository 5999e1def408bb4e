//! The shared server context and its HTTP entry points.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::access::AccessController;
use crate::config::ServerConfig;
use crate::events::{EventSink, LogSink};
use crate::repo::{Preprocessor, RepositoryResolver};
use crate::routing::{self, ServiceRegistry};
use crate::tool::GitTool;
use crate::{AppError, Result};

/// Immutable context shared by every request.
pub struct GitHttp {
    config: ServerConfig,
    tool: GitTool,
    resolver: RepositoryResolver,
    access: AccessController,
    registry: ServiceRegistry,
    sink: Arc<dyn EventSink>,
}

impl GitHttp {
    /// Build the context for `config`.
    ///
    /// Events go to a [`LogSink`] until [`GitHttp::with_event_sink`] says
    /// otherwise; no hook is installed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid or no
    /// git binary can be found.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let tool = match &config.git_bin_path {
            Some(bin) => GitTool::new(bin),
            None => GitTool::discover()?,
        };
        let resolver = RepositoryResolver::new(&config.project_root, tool.clone())
            .auto_create(config.auto_create, config.layout());
        let access = AccessController::new(config.access_rules(), tool.clone());
        Ok(Self {
            registry: ServiceRegistry::standard()?,
            sink: Arc::new(LogSink),
            config,
            tool,
            resolver,
            access,
        })
    }

    /// Install the preprocessing hook.
    #[must_use]
    pub fn with_preprocessor(mut self, hook: Preprocessor) -> Self {
        self.resolver = self.resolver.with_hook(hook);
        self
    }

    /// Deliver exchange events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Create the project root if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory cannot be created.
    pub fn init(self) -> Result<Self> {
        let root = &self.config.project_root;
        std::fs::create_dir_all(root).map_err(|err| {
            AppError::Config(format!(
                "failed to create project root {}: {err}",
                root.display()
            ))
        })?;
        Ok(self)
    }

    /// The configuration the context was built from.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The git binary.
    #[must_use]
    pub fn tool(&self) -> &GitTool {
        &self.tool
    }

    /// Repository resolution.
    #[must_use]
    pub fn resolver(&self) -> &RepositoryResolver {
        &self.resolver
    }

    /// Service access control.
    #[must_use]
    pub fn access(&self) -> &AccessController {
        &self.access
    }

    /// Endpoint table.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Where exchange events go.
    #[must_use]
    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    /// An axum router answering every path through the registry.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(handle).with_state(self)
    }
}

impl std::fmt::Debug for GitHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHttp")
            .field("config", &self.config)
            .field("tool", &self.tool)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

async fn handle(State(ctx): State<Arc<GitHttp>>, request: Request) -> Response {
    routing::dispatch(ctx, request).await
}

/// Bind `addr` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address cannot be bound or the
/// server fails.
pub async fn serve(ctx: Arc<GitHttp>, addr: SocketAddr, ct: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {addr}: {err}")))?;
    serve_listener(ctx, listener, ct).await
}

/// Serve on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails.
pub async fn serve_listener(
    ctx: Arc<GitHttp>,
    listener: TcpListener,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Config(format!("listener has no address: {err}")))?;
    info!(%local, root = %ctx.config().project_root.display(), "serving git over http");

    axum::serve(listener, ctx.router())
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("http server error: {err}")))?;

    info!("http server shut down");
    Ok(())
}

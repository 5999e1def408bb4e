#![forbid(unsafe_code)]

//! `git-http-bridge`: serve a directory of git repositories over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
#[cfg(unix)]
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use git_http_bridge::server;
use git_http_bridge::{AppError, GitHttp, Result, ServerConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "git-http-bridge", about = "Git smart and dumb HTTP server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the project root holding the repositories.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match (&args.config, &args.root) {
        (Some(path), _) => ServerConfig::load_from_path(path)?,
        (None, Some(root)) => ServerConfig::new(root),
        (None, None) => {
            return Err(AppError::Config(
                "either --config or --root is required".into(),
            ))
        }
    };
    if let Some(root) = args.root {
        config.project_root = root;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    let bind = config.bind;

    let ctx = Arc::new(GitHttp::new(config)?.init()?);
    info!(git = %ctx.tool().bin().display(), "configuration loaded");

    let ct = CancellationToken::new();
    let server = tokio::spawn(server::serve(Arc::clone(&ctx), bind, ct.clone()));

    let signal = shutdown_signal().await;
    info!(signal, "stopping git http server");
    ct.cancel();

    match server.await {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "server task failed");
            Err(AppError::Io(format!("server task failed: {err}")))
        }
    }
}

/// Wait for ctrl-c or SIGTERM and name the one that arrived.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "ctrl-c",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(err) => {
            warn!(%err, "SIGTERM handler unavailable, stopping on ctrl-c only");
            wait_for_ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "ctrl-c handler failed, stopping now");
    }
    "ctrl-c"
}

/// Install the global subscriber. `RUST_LOG` wins over the default of
/// this crate at `info` and everything else at `warn`.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,git_http_bridge=info"));
    let subscriber = fmt().with_env_filter(env_filter);

    let installed = match log_format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    };
    installed.map_err(|err| AppError::Config(format!("failed to install log subscriber: {err}")))
}

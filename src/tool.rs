//! Subprocess contract with the git binary.
//!
//! Short commands (`config`, `update-server-info`, `init`, ref
//! advertisement) run to completion and return their stdout. The
//! streaming RPC commands are spawned with piped stdio and handed back to
//! the caller. Every child is created with `kill_on_drop(true)`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::rpc::Rpc;
use crate::{AppError, Result};

/// Handle on the git binary used for every subprocess.
#[derive(Debug, Clone)]
pub struct GitTool {
    bin: PathBuf,
}

impl GitTool {
    /// Use the binary at `bin`.
    #[must_use]
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// Locate `git` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no `git` binary can be found.
    pub fn discover() -> Result<Self> {
        which::which("git")
            .map(Self::new)
            .map_err(|err| AppError::Config(format!("git binary not found on PATH: {err}")))
    }

    /// Path to the binary.
    #[must_use]
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// `git <rpc> --stateless-rpc .` with piped stdin and stdout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tool` if the process cannot be started.
    pub fn spawn_rpc(&self, dir: &Path, rpc: Rpc) -> Result<Child> {
        debug!(rpc = rpc.as_str(), dir = %dir.display(), "spawning stateless rpc");
        Command::new(&self.bin)
            .args([rpc.as_str(), "--stateless-rpc", "."])
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Tool(format!("failed to spawn {}: {err}", rpc.as_str())))
    }

    /// `git <rpc> --stateless-rpc --advertise-refs .`
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tool` if git fails.
    pub async fn advertise_refs(&self, dir: &Path, rpc: Rpc) -> Result<Vec<u8>> {
        self.output(dir, &[rpc.as_str(), "--stateless-rpc", "--advertise-refs", "."])
            .await
    }

    /// `git update-server-info`, refreshing the files dumb clients read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tool` if git fails.
    pub async fn update_server_info(&self, dir: &Path) -> Result<()> {
        self.output(dir, &["update-server-info"]).await.map(|_| ())
    }

    /// `git config <key>`, with the trailing newline removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tool` if the key is unset or git fails.
    pub async fn config_value(&self, dir: &Path, key: &str) -> Result<String> {
        let out = self.output(dir, &["config", key]).await?;
        let value = String::from_utf8_lossy(&out);
        Ok(value.strip_suffix('\n').unwrap_or(&value).to_owned())
    }

    /// Initialize a repository in the existing directory `dir`.
    ///
    /// Blocking: called from the resolver, which runs off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tool` if git fails.
    pub fn init_blocking(&self, dir: &Path, bare: bool) -> Result<()> {
        let args: &[&str] = if bare { &["--bare", "init"] } else { &["init"] };
        let output = std::process::Command::new(&self.bin)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| AppError::Tool(format!("failed to run git init: {err}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AppError::Tool(format!(
                "git init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn output(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.bin)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AppError::Tool(format!("failed to run git {}: {err}", args.join(" "))))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(AppError::Tool(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

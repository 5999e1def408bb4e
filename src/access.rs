//! Access control for the smart-protocol services.
//!
//! Evaluation order:
//! 1. Optionally, the request `Content-Type` must be exactly
//!    `application/x-git-<rpc>-request`.
//! 2. The service must be `upload-pack` or `receive-pack`.
//! 3. A statically configured permission for the service wins.
//! 4. Otherwise the repository's own `http.uploadpack` /
//!    `http.receivepack` setting decides. Upload is opt-out (allowed unless
//!    set to `false`), receive is opt-in (denied unless set to `true`).
//!    A setting that cannot be read counts as unset.

use std::path::Path;

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use tracing::{debug, info_span, Instrument};

use crate::rpc::Rpc;
use crate::tool::GitTool;
use crate::Result;

/// Static permissions, `None` deferring to repository configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessRules {
    /// Permission for `upload-pack` (fetch/clone).
    pub upload_pack: Option<bool>,
    /// Permission for `receive-pack` (push).
    pub receive_pack: Option<bool>,
}

impl AccessRules {
    fn for_rpc(self, rpc: Rpc) -> Option<bool> {
        match rpc {
            Rpc::UploadPack => self.upload_pack,
            Rpc::ReceivePack => self.receive_pack,
        }
    }
}

/// Decides whether a service may run against a repository.
#[derive(Debug, Clone)]
pub struct AccessController {
    rules: AccessRules,
    tool: GitTool,
}

impl AccessController {
    /// Controller enforcing `rules`, reading repository config through `tool`.
    #[must_use]
    pub fn new(rules: AccessRules, tool: GitTool) -> Self {
        Self { rules, tool }
    }

    /// Whether `rpc_name` may run against the repository at `dir`.
    ///
    /// A denial is `Ok(false)`; the caller decides how to report it.
    ///
    /// # Errors
    ///
    /// Currently infallible; configuration read failures are treated as
    /// an unset setting.
    pub async fn has_access(
        &self,
        headers: &HeaderMap,
        dir: &Path,
        rpc_name: &str,
        check_content_type: bool,
    ) -> Result<bool> {
        if check_content_type {
            let expected = format!("application/x-git-{rpc_name}-request");
            let declared = headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok());
            if declared != Some(expected.as_str()) {
                debug!(rpc = rpc_name, ?declared, "content type mismatch, denying");
                return Ok(false);
            }
        }

        let Some(rpc) = Rpc::parse(rpc_name) else {
            return Ok(false);
        };

        if let Some(allowed) = self.rules.for_rpc(rpc) {
            return Ok(allowed);
        }

        let span = info_span!("repository_access", rpc = rpc.as_str(), dir = %dir.display());
        Ok(self.repository_setting(dir, rpc).instrument(span).await)
    }

    async fn repository_setting(&self, dir: &Path, rpc: Rpc) -> bool {
        let value = match self.tool.config_value(dir, &rpc.config_key()).await {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%err, "repository setting unavailable, treating as unset");
                None
            }
        };
        repository_default(rpc, value.as_deref())
    }
}

/// Permission implied by a repository setting's raw value.
#[must_use]
pub fn repository_default(rpc: Rpc, value: Option<&str>) -> bool {
    match rpc {
        Rpc::UploadPack => value != Some("false"),
        Rpc::ReceivePack => value == Some("true"),
    }
}

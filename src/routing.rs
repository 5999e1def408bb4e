//! URL classification and request dispatch.
//!
//! Every request path is matched against the [`ServiceRegistry`]. The
//! registry's patterns are mutually exclusive: a path selects exactly one
//! [`Service`] or none, and a path matching several is reported as a
//! configuration error instead of being served by an arbitrary entry.
//!
//! | Pattern suffix                          | Method | Handler        |
//! |-----------------------------------------|--------|----------------|
//! | `/git-upload-pack`                      | POST   | RPC            |
//! | `/git-receive-pack`                     | POST   | RPC            |
//! | `/info/refs`                            | GET    | ref advertisement |
//! | `/HEAD`                                 | GET    | text file      |
//! | `/objects/info/alternates`              | GET    | text file      |
//! | `/objects/info/http-alternates`         | GET    | text file      |
//! | `/objects/info/packs`                   | GET    | pack list      |
//! | `/objects/[0-9a-f]{2}/[0-9a-f]{38}`     | GET    | loose object   |
//! | `/objects/pack/pack-<40 hex>.pack`      | GET    | pack file      |
//! | `/objects/pack/pack-<40 hex>.idx`       | GET    | pack index     |

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{StatusCode, Version};
use axum::response::Response;
use regex::Regex;
use tracing::{debug, error, info_span, Instrument};

use crate::files;
use crate::rpc::{self, Rpc};
use crate::server::GitHttp;
use crate::{AppError, Result};

/// Code that serves a matched endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Streaming `upload-pack` / `receive-pack`.
    ServiceRpc,
    /// `info/refs`, smart or dumb.
    InfoRefs,
    /// `objects/info/packs`.
    InfoPacks,
    /// `HEAD` and the alternates files.
    TextFile,
    /// A loose object.
    LooseObject,
    /// A packfile.
    PackFile,
    /// A pack index.
    IdxFile,
}

impl Handler {
    async fn call(self, ctx: Arc<GitHttp>, hr: HandlerRequest) -> Result<Response> {
        match self {
            Self::ServiceRpc => rpc::serve_rpc(ctx, hr).await,
            Self::InfoRefs => files::info_refs(&ctx, hr).await,
            Self::InfoPacks => files::info_packs(hr).await,
            Self::TextFile => files::text_file(hr).await,
            Self::LooseObject => files::loose_object(hr).await,
            Self::PackFile => files::pack_file(hr).await,
            Self::IdxFile => files::idx_file(hr).await,
        }
    }
}

/// Operation descriptor for one endpoint pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    /// The only method the endpoint accepts.
    pub method: &'static str,
    /// Code serving the endpoint.
    pub handler: Handler,
    /// Smart-protocol service, for the RPC endpoints.
    pub rpc: Option<Rpc>,
}

impl Service {
    const fn get(handler: Handler) -> Self {
        Self {
            method: "GET",
            handler,
            rpc: None,
        }
    }

    const fn post(rpc: Rpc) -> Self {
        Self {
            method: "POST",
            handler: Handler::ServiceRpc,
            rpc: Some(rpc),
        }
    }
}

/// Everything a handler gets for one request.
#[derive(Debug)]
pub struct HandlerRequest {
    /// The request, body included.
    pub request: Request,
    /// Smart-protocol service of the endpoint.
    pub rpc: Option<Rpc>,
    /// Repository directory; the working directory for git.
    pub dir: PathBuf,
    /// Directory holding the repository's internals (`dir` for bare
    /// repositories, `dir/.git` otherwise).
    pub git_dir: PathBuf,
    /// Path of the requested file relative to the repository.
    pub file: String,
}

/// A registry hit: the repository part of the path and its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Path prefix naming the repository, leading slash included.
    pub repo: String,
    /// The matched descriptor.
    pub service: Service,
}

/// Pattern → descriptor table, read-only once built.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    entries: Vec<(Regex, Service)>,
}

impl ServiceRegistry {
    /// The endpoints of the smart and dumb protocols.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern fails to compile.
    pub fn standard() -> Result<Self> {
        Self::from_patterns(&[
            (r"^(.*?)/git-upload-pack$", Service::post(Rpc::UploadPack)),
            (r"^(.*?)/git-receive-pack$", Service::post(Rpc::ReceivePack)),
            (r"^(.*?)/info/refs$", Service::get(Handler::InfoRefs)),
            (r"^(.*?)/HEAD$", Service::get(Handler::TextFile)),
            (
                r"^(.*?)/objects/info/alternates$",
                Service::get(Handler::TextFile),
            ),
            (
                r"^(.*?)/objects/info/http-alternates$",
                Service::get(Handler::TextFile),
            ),
            (r"^(.*?)/objects/info/packs$", Service::get(Handler::InfoPacks)),
            (
                r"^(.*?)/objects/[0-9a-f]{2}/[0-9a-f]{38}$",
                Service::get(Handler::LooseObject),
            ),
            (
                r"^(.*?)/objects/pack/pack-[0-9a-f]{40}\.pack$",
                Service::get(Handler::PackFile),
            ),
            (
                r"^(.*?)/objects/pack/pack-[0-9a-f]{40}\.idx$",
                Service::get(Handler::IdxFile),
            ),
        ])
    }

    /// Build a registry from `(pattern, descriptor)` pairs.
    ///
    /// Each pattern's first capture group must be the repository path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern fails to compile.
    pub fn from_patterns(patterns: &[(&str, Service)]) -> Result<Self> {
        let entries = patterns
            .iter()
            .map(|(pattern, service)| {
                Regex::new(pattern)
                    .map(|regex| (regex, *service))
                    .map_err(|err| AppError::Config(format!("invalid route {pattern:?}: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// The descriptor matching `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if more than one pattern matches.
    pub fn find(&self, path: &str) -> Result<Option<Route>> {
        let mut found: Option<Route> = None;
        for (regex, service) in &self.entries {
            let Some(captures) = regex.captures(path) else {
                continue;
            };
            if let Some(previous) = &found {
                return Err(AppError::Config(format!(
                    "path {path:?} matches both {:?} and {:?}",
                    previous.service.handler, service.handler
                )));
            }
            let repo = captures.get(1).map_or("", |m| m.as_str());
            found = Some(Route {
                repo: repo.to_owned(),
                service: *service,
            });
        }
        Ok(found)
    }
}

/// Answer one request. Always produces a response.
pub async fn dispatch(ctx: Arc<GitHttp>, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    let span = info_span!("git_request", method = %request.method(), path = %path);
    route_request(ctx, request, path).instrument(span).await
}

async fn route_request(ctx: Arc<GitHttp>, request: Request, path: String) -> Response {
    let route = match ctx.registry().find(&path) {
        Ok(Some(route)) => route,
        Ok(None) => return render_not_found(),
        Err(err) => {
            error!(%err, "ambiguous route table");
            return render_error(&err);
        }
    };

    if request.method().as_str() != route.service.method {
        return render_method_not_allowed(request.version(), route.service.method);
    }

    let file = path
        .strip_prefix(&format!("{}/", route.repo))
        .unwrap_or(&path)
        .to_owned();

    let resolved = {
        let ctx = Arc::clone(&ctx);
        let repo = route.repo.clone();
        tokio::task::spawn_blocking(move || ctx.resolver().resolve(&repo)).await
    };
    let resolved = match resolved {
        Ok(Ok(resolved)) => resolved,
        Ok(Err(err)) => {
            debug!(repo = %route.repo, %err, "repository not resolved");
            return render_not_found();
        }
        Err(err) => {
            error!(%err, "repository resolution task failed");
            return render_error(&AppError::Io(err.to_string()));
        }
    };

    let hr = HandlerRequest {
        request,
        rpc: route.service.rpc,
        dir: resolved.local_path,
        git_dir: resolved.git_dir,
        file,
    };
    match route.service.handler.call(ctx, hr).await {
        Ok(response) => response,
        Err(err) => render_failure(&err),
    }
}

fn render_failure(err: &AppError) -> Response {
    match err.status() {
        StatusCode::NOT_FOUND => {
            debug!(%err, "not found");
            render_not_found()
        }
        StatusCode::FORBIDDEN => {
            debug!(%err, "access denied");
            render_no_access()
        }
        _ => {
            error!(%err, "handler failed");
            render_error(err)
        }
    }
}

fn plain(status: StatusCode, body: impl Into<Body>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn render_not_found() -> Response {
    plain(StatusCode::NOT_FOUND, "Not Found")
}

fn render_no_access() -> Response {
    plain(StatusCode::FORBIDDEN, "Forbidden")
}

fn render_method_not_allowed(version: Version, allowed: &'static str) -> Response {
    if version >= Version::HTTP_11 {
        let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(ALLOW, axum::http::HeaderValue::from_static(allowed));
        response
    } else {
        plain(StatusCode::BAD_REQUEST, "Bad Request")
    }
}

fn render_error(err: &AppError) -> Response {
    plain(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

//! Ref advertisement and static file handlers.
//!
//! `info/refs` is the only endpoint shared by both protocols: a smart
//! client names a service in the query string and gets the packet-framed
//! output of `--advertise-refs`; anyone else gets the plain file that
//! `git update-server-info` maintains. Everything else here serves a file
//! from the repository's git directory verbatim.

use axum::body::Body;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, DATE, EXPIRES, LAST_MODIFIED, PRAGMA,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::pktline::{flush_packet, write_packet};
use crate::routing::HandlerRequest;
use crate::rpc::Rpc;
use crate::server::GitHttp;
use crate::{AppError, Result};

/// HTTP date format (RFC 7231 IMF-fixdate).
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Caching policy of a served resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Caching {
    /// Mutable content: refs, `HEAD`, alternates.
    Never,
    /// Content-addressed objects and packs.
    Forever,
}

impl Caching {
    pub(crate) fn apply(self, headers: &mut HeaderMap) {
        match self {
            Self::Never => {
                headers.insert(
                    EXPIRES,
                    HeaderValue::from_static("Fri, 01 Jan 1980 00:00:00 GMT"),
                );
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
                headers.insert(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
                );
            }
            Self::Forever => {
                let now = Utc::now();
                insert_date(headers, DATE, now);
                insert_date(headers, EXPIRES, now + Duration::days(365));
                headers.insert(
                    CACHE_CONTROL,
                    HeaderValue::from_static("public, max-age=31536000"),
                );
            }
        }
    }
}

/// Format `at` as an HTTP date.
#[must_use]
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE).to_string()
}

fn insert_date(headers: &mut HeaderMap, name: axum::http::HeaderName, at: DateTime<Utc>) {
    if let Ok(value) = HeaderValue::from_str(&http_date(at)) {
        headers.insert(name, value);
    }
}

/// `GET <repo>/info/refs`, smart or dumb.
///
/// A smart request whose service is denied falls back to the dumb
/// response, like a server without smart support would answer.
///
/// # Errors
///
/// - `AppError::Tool` if the ref advertisement fails.
/// - `AppError::NotFound` if the dumb `info/refs` file is missing.
pub async fn info_refs(ctx: &GitHttp, hr: HandlerRequest) -> Result<Response> {
    let service = service_param(hr.request.uri());
    let mut rpc = service.as_deref().and_then(Rpc::parse);
    if let Some(requested) = rpc {
        let granted = ctx
            .access()
            .has_access(hr.request.headers(), &hr.dir, requested.as_str(), false)
            .await?;
        if !granted {
            rpc = None;
        }
    }

    let Some(rpc) = rpc else {
        debug!(?service, "serving dumb ref list");
        if let Err(err) = ctx.tool().update_server_info(&hr.dir).await {
            warn!(%err, dir = %hr.dir.display(), "update-server-info failed");
        }
        return send_file(hr, "text/plain; charset=utf-8", Caching::Never).await;
    };

    let refs = ctx.tool().advertise_refs(&hr.dir, rpc).await?;
    let mut body = write_packet(&format!("# service=git-{}", rpc.as_str()));
    body.extend_from_slice(&flush_packet());
    body.extend_from_slice(&refs);

    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    Caching::Never.apply(headers);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&rpc.advertisement_content_type())
            .map_err(|err| AppError::Protocol(err.to_string()))?,
    );
    Ok(response)
}

/// `objects/info/packs`.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the file is missing.
pub async fn info_packs(hr: HandlerRequest) -> Result<Response> {
    send_file(hr, "text/plain; charset=utf-8", Caching::Forever).await
}

/// A loose object.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the object is missing.
pub async fn loose_object(hr: HandlerRequest) -> Result<Response> {
    send_file(hr, "application/x-git-loose-object", Caching::Forever).await
}

/// A packfile.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the pack is missing.
pub async fn pack_file(hr: HandlerRequest) -> Result<Response> {
    send_file(hr, "application/x-git-packed-objects", Caching::Forever).await
}

/// A pack index.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the index is missing.
pub async fn idx_file(hr: HandlerRequest) -> Result<Response> {
    send_file(hr, "application/x-git-packed-objects-toc", Caching::Forever).await
}

/// `HEAD` and the alternates files.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the file is missing.
pub async fn text_file(hr: HandlerRequest) -> Result<Response> {
    send_file(hr, "text/plain", Caching::Never).await
}

/// Stream `hr.file` from the repository's git directory.
///
/// By value: the body is not `Sync`, so a borrow of the request held
/// across an await makes the handler future non-`Send`.
async fn send_file(
    hr: HandlerRequest,
    content_type: &'static str,
    caching: Caching,
) -> Result<Response> {
    let path = hr.git_dir.join(&hr.file);
    let metadata = tokio::fs::metadata(&path).await?;
    if !metadata.is_file() {
        return Err(AppError::NotFound(format!("{} is not a file", path.display())));
    }
    let file = tokio::fs::File::open(&path).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    caching.apply(headers);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified() {
        insert_date(headers, LAST_MODIFIED, DateTime::<Utc>::from(modified));
    }
    debug!(file = %path.display(), bytes = metadata.len(), "serving file");
    Ok(response)
}

/// The `service` query parameter with its `git-` prefix removed.
///
/// Values without the prefix are ignored.
#[must_use]
pub fn service_param(uri: &Uri) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "service")
        .and_then(|(_, value)| value.strip_prefix("git-"))
        .map(str::to_owned)
}

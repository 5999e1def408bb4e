//! Streaming smart-protocol RPCs (`git-upload-pack`, `git-receive-pack`).
//!
//! The request body is piped through `git <rpc> --stateless-rpc` and the
//! tool's output streamed back as the response body. Both directions are
//! copied concurrently by a background exchange task, so a tool that
//! writes before it has read all of its input never stalls the client.
//! The response body ends only after the tool has exited and the
//! exchange's events have been delivered.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::events::{EventSink, RequestInfo};
use crate::files::Caching;
use crate::routing::HandlerRequest;
use crate::scan::commands::CommandScanner;
use crate::scan::sideband::SidebandScanner;
use crate::scan::ScanReader;
use crate::server::GitHttp;
use crate::{AppError, Result};

/// Capacity of the in-memory pipe between git's stdout and the response.
const RESPONSE_PIPE_BYTES: usize = 64 * 1024;

/// The two smart-protocol services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    /// Fetch and clone.
    UploadPack,
    /// Push.
    ReceivePack,
}

impl Rpc {
    /// Parse a service name without its `git-` prefix.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "upload-pack" => Some(Self::UploadPack),
            "receive-pack" => Some(Self::ReceivePack),
            _ => None,
        }
    }

    /// Service name as passed to the git binary.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
        }
    }

    /// Content type a client must send with an RPC request.
    #[must_use]
    pub fn request_content_type(self) -> String {
        format!("application/x-git-{}-request", self.as_str())
    }

    /// Content type of an RPC response.
    #[must_use]
    pub fn result_content_type(self) -> String {
        format!("application/x-git-{}-result", self.as_str())
    }

    /// Content type of a ref advertisement.
    #[must_use]
    pub fn advertisement_content_type(self) -> String {
        format!("application/x-git-{}-advertisement", self.as_str())
    }

    /// Repository config key consulted when no static permission is set.
    #[must_use]
    pub fn config_key(self) -> String {
        format!("http.{}", self.as_str().replace('-', ""))
    }
}

/// Serve `POST <repo>/git-<rpc>`.
///
/// Fails before any response is produced when access is denied, the body
/// encoding is unsupported or git cannot be started. Once the response is
/// returned its status is committed; later failures only reach the event
/// sink.
///
/// # Errors
///
/// - `AppError::NoAccess` if the access controller denies the request.
/// - `AppError::Protocol` for an unsupported `Content-Encoding`.
/// - `AppError::Tool` if git cannot be spawned.
pub async fn serve_rpc(ctx: Arc<GitHttp>, hr: HandlerRequest) -> Result<Response> {
    let HandlerRequest {
        request, rpc, dir, ..
    } = hr;
    let rpc = rpc.ok_or_else(|| AppError::NotFound("endpoint has no rpc".into()))?;
    let (parts, body) = request.into_parts();

    if !ctx
        .access()
        .has_access(&parts.headers, &dir, rpc.as_str(), true)
        .await?
    {
        return Err(AppError::NoAccess(dir));
    }

    let reader = request_reader(&parts.headers, body)?;
    let outbound = ScanReader::new(reader, CommandScanner::new(rpc));

    let mut child = ctx.tool().spawn_rpc(&dir, rpc)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Tool("failed to capture git stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Tool("failed to capture git stdout".into()))?;

    let (pipe_writer, pipe_reader) = tokio::io::duplex(RESPONSE_PIPE_BYTES);
    let request = RequestInfo {
        id: Uuid::new_v4(),
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
    };
    let span = info_span!(
        "rpc_exchange",
        request_id = %request.id,
        rpc = rpc.as_str(),
        dir = %dir.display(),
    );
    let exchange = Exchange {
        rpc,
        dir,
        request,
        sink: ctx.event_sink(),
    };
    tokio::spawn(
        exchange
            .run(child, outbound, stdin, stdout, pipe_writer)
            .instrument(span),
    );

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, rpc.result_content_type())
        .body(Body::from_stream(ReaderStream::new(pipe_reader)))
        .map_err(|err| AppError::Io(format!("failed to build response: {err}")))?;
    Caching::Never.apply(response.headers_mut());
    Ok(response)
}

/// Everything the exchange task needs besides its streams.
struct Exchange {
    rpc: Rpc,
    dir: PathBuf,
    request: RequestInfo,
    sink: Arc<dyn EventSink>,
}

impl Exchange {
    async fn run<R, I, O, W>(
        self,
        mut child: Child,
        mut outbound: ScanReader<R, CommandScanner>,
        mut stdin: I,
        stdout: O,
        mut response: W,
    ) where
        R: AsyncRead + Unpin,
        I: AsyncWrite + Unpin,
        O: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut inbound = ScanReader::new(stdout, SidebandScanner::new());

        let send = async {
            let copied = tokio::io::copy(&mut outbound, &mut stdin).await;
            let closed = stdin.shutdown().await;
            drop(stdin);
            copied.and_then(|n| closed.map(|()| n))
        };
        let receive = async {
            let copied = tokio::io::copy(&mut inbound, &mut response).await;
            let copied = match copied {
                Ok(n) => response.flush().await.map(|()| n),
                Err(err) => Err(err),
            };
            if copied.is_err() {
                // Nobody drains git's stdout any more; stop it so the
                // other copy and the wait below can finish.
                if let Err(err) = child.start_kill() {
                    debug!(%err, "git already exited");
                }
            }
            copied
        };
        let (sent, received) = tokio::join!(send, receive);

        match &sent {
            Ok(bytes) => debug!(bytes, "request body forwarded to git"),
            // git may stop reading once it has what it needs; a real
            // truncation shows up as a non-zero exit instead.
            Err(err) => debug!(%err, "forwarding request body stopped early"),
        }

        let status = child.wait().await;
        let sideband = inbound.into_scanner();
        let error = match status {
            Ok(status) if status.success() => match received {
                Ok(bytes) => {
                    debug!(bytes, "git output streamed to client");
                    sideband.into_error()
                }
                Err(err) => Some(AppError::Io(format!(
                    "streaming git output to client failed: {err}"
                ))),
            },
            Ok(status) => Some(AppError::Tool(format!(
                "git {} exited with {status}",
                self.rpc.as_str()
            ))),
            Err(err) => Some(AppError::Io(format!("failed to wait for git: {err}"))),
        };
        let error = error.map(Arc::new);

        match &error {
            None => info!("rpc exchange complete"),
            Some(err) => warn!(%err, "rpc exchange failed"),
        }

        for mut event in outbound.into_scanner().into_events() {
            event.dir.clone_from(&self.dir);
            event.request = Some(self.request.clone());
            event.error.clone_from(&error);
            self.sink.handle(event);
        }

        drop(response);
    }
}

/// The request body as a reader, gunzipped when the client compressed it.
fn request_reader(
    headers: &HeaderMap,
    body: Body,
) -> Result<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>> {
    let raw = body.into_data_stream().map_err(io::Error::other);
    let encoding = headers
        .get(CONTENT_ENCODING)
        .map(HeaderValue::to_str)
        .transpose()
        .map_err(|_| AppError::Protocol("unreadable content encoding".into()))?;
    let stream = match encoding {
        None | Some("identity") => raw.boxed(),
        Some("gzip" | "x-gzip") => gunzip(raw.boxed()),
        Some(other) => {
            return Err(AppError::Protocol(format!(
                "unsupported content encoding {other:?}"
            )));
        }
    };
    Ok(StreamReader::new(stream))
}

/// Decompress a gzip byte stream chunk by chunk.
fn gunzip(
    compressed: BoxStream<'static, io::Result<Bytes>>,
) -> BoxStream<'static, io::Result<Bytes>> {
    let state = Some((compressed, GzDecoder::new(Vec::new())));
    stream::unfold(state, |state| async move {
        let (mut compressed, mut decoder) = state?;
        loop {
            match compressed.next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = decoder.write_all(&chunk) {
                        return Some((Err(err), None));
                    }
                    let inflated = std::mem::take(decoder.get_mut());
                    if !inflated.is_empty() {
                        return Some((Ok(Bytes::from(inflated)), Some((compressed, decoder))));
                    }
                }
                Some(Err(err)) => return Some((Err(err), None)),
                None => {
                    return match decoder.finish() {
                        Ok(rest) if rest.is_empty() => None,
                        Ok(rest) => Some((Ok(Bytes::from(rest)), None)),
                        Err(err) => Some((Err(err), None)),
                    };
                }
            }
        }
    })
    .boxed()
}

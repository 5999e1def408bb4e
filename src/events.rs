//! Events raised by RPC exchanges and the sink they are delivered to.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri};
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppError;

/// What the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A tag was created or moved by a push.
    Tag,
    /// A branch was updated by a push.
    Push,
    /// A commit was requested by a fetch or clone.
    Fetch,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tag => "tag",
            Self::Push => "push",
            Self::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

/// The HTTP request an event originated from.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Correlates the event with the exchange's log lines.
    pub id: Uuid,
    /// Request method.
    pub method: Method,
    /// Request URI, query included.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

/// A ref update or want observed during an RPC exchange.
///
/// Scanners fill in the payload fields; the dispatcher stamps `dir`,
/// `request` and `error` once the exchange has finished.
#[derive(Debug, Clone)]
pub struct Event {
    /// Kind of operation.
    pub kind: EventKind,
    /// New tip of the ref, or the wanted object.
    pub commit: String,
    /// Branch name without `refs/heads/`, for pushes.
    pub branch: Option<String>,
    /// Tag name without `refs/tags/`, for tags.
    pub tag: Option<String>,
    /// Previous tip of the ref, for pushes and tags.
    pub last: Option<String>,
    /// Local repository directory.
    pub dir: PathBuf,
    /// Originating request.
    pub request: Option<RequestInfo>,
    /// Terminal error of the exchange, `None` on success.
    pub error: Option<Arc<AppError>>,
}

impl Event {
    /// An unstamped event.
    #[must_use]
    pub fn new(kind: EventKind, commit: impl Into<String>) -> Self {
        Self {
            kind,
            commit: commit.into(),
            branch: None,
            tag: None,
            last: None,
            dir: PathBuf::new(),
            request: None,
            error: None,
        }
    }
}

/// Receives every event once its exchange has completed.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn handle(&self, event: Event);
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn handle(&self, event: Event) {
        self(event);
    }
}

/// Default sink: writes each event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn handle(&self, event: Event) {
        let request_id = event.request.as_ref().map(|request| request.id);
        match &event.error {
            None => info!(
                kind = %event.kind,
                commit = %event.commit,
                branch = event.branch.as_deref(),
                tag = event.tag.as_deref(),
                dir = %event.dir.display(),
                ?request_id,
                "git event"
            ),
            Some(err) => warn!(
                kind = %event.kind,
                commit = %event.commit,
                dir = %event.dir.display(),
                ?request_id,
                %err,
                "git event failed"
            ),
        }
    }
}

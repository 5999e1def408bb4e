//! Outbound command scanner.
//!
//! Recognized commands, all found before the first flush:
//!
//! | RPC            | Line                                   | Event   |
//! |----------------|----------------------------------------|---------|
//! | `receive-pack` | `<old> <new> refs/heads/<branch>[\0…]` | `Push`  |
//! | `receive-pack` | `<old> <new> refs/tags/<tag>[\0…]`     | `Tag`   |
//! | `upload-pack`  | `want <oid>[ <caps>]`                  | `Fetch` |
//!
//! Everything else (`shallow`, `have`, capability lines, other ref
//! namespaces, malformed lines) is skipped.

use crate::events::{Event, EventKind};
use crate::pktline::Packet;
use crate::rpc::Rpc;

use super::{Flow, FrameBuffer, StreamScanner};

/// Collects an [`Event`] for every ref update or want the client sends.
#[derive(Debug)]
pub struct CommandScanner {
    rpc: Rpc,
    frames: FrameBuffer,
    events: Vec<Event>,
}

impl CommandScanner {
    /// Scanner for a request to `rpc`.
    #[must_use]
    pub fn new(rpc: Rpc) -> Self {
        Self {
            rpc,
            frames: FrameBuffer::default(),
            events: Vec::new(),
        }
    }

    /// Events seen so far, in stream order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Consume the scanner, returning its events in stream order.
    #[must_use]
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Whether the command section has ended.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.frames.is_stopped()
    }
}

impl StreamScanner for CommandScanner {
    fn observe(&mut self, bytes: &[u8]) {
        let rpc = self.rpc;
        let events = &mut self.events;
        self.frames.push(bytes, |packet| match packet {
            Packet::Flush => Flow::Stop,
            Packet::Delimiter | Packet::ResponseEnd => Flow::Continue,
            Packet::Data(_) => {
                let parsed = packet
                    .text()
                    .and_then(|line| std::str::from_utf8(line).ok())
                    .and_then(|line| match rpc {
                        Rpc::ReceivePack => parse_ref_update(line),
                        Rpc::UploadPack => parse_want(line),
                    });
                if let Some(event) = parsed {
                    events.push(event);
                }
                Flow::Continue
            }
        });
    }
}

/// Parse `<old> <new> <ref>[\0<caps>]`.
fn parse_ref_update(line: &str) -> Option<Event> {
    let command = line.split('\0').next().unwrap_or(line);
    let mut parts = command.splitn(3, ' ');
    let old = parts.next().filter(|oid| is_object_id(oid))?;
    let new = parts.next().filter(|oid| is_object_id(oid))?;
    let name = parts.next()?.trim_end();

    let mut event = if let Some(branch) = name.strip_prefix("refs/heads/") {
        let mut event = Event::new(EventKind::Push, new);
        event.branch = Some(branch.to_owned());
        event
    } else if let Some(tag) = name.strip_prefix("refs/tags/") {
        let mut event = Event::new(EventKind::Tag, new);
        event.tag = Some(tag.to_owned());
        event
    } else {
        return None;
    };
    event.last = Some(old.to_owned());
    Some(event)
}

/// Parse `want <oid>[ <caps>]`.
fn parse_want(line: &str) -> Option<Event> {
    let rest = line.strip_prefix("want ")?;
    let oid = rest.split(' ').next().filter(|oid| is_object_id(oid))?;
    Some(Event::new(EventKind::Fetch, oid))
}

/// SHA-1 or SHA-256 hex object id.
fn is_object_id(candidate: &str) -> bool {
    matches!(candidate.len(), 40 | 64) && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

//! Pass-through stream scanners.
//!
//! A [`ScanReader`] sits between a byte source and its consumer. Every
//! byte read through it reaches the consumer unchanged and in order; the
//! same bytes are shown to a [`StreamScanner`], which accumulates its
//! observations on the side. Scanners are read-once and cannot rewind.
//!
//! - [`commands::CommandScanner`] watches the client's request for ref
//!   updates and wants, producing [`crate::events::Event`]s.
//! - [`sideband::SidebandScanner`] watches git's output for an embedded
//!   error band.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::pktline::{Packet, PktLineCodec};

pub mod commands;
pub mod sideband;

/// Observer fed with every byte that passes through a [`ScanReader`].
pub trait StreamScanner {
    /// Inspect the next chunk of the stream.
    fn observe(&mut self, bytes: &[u8]);
}

/// `AsyncRead` adapter that shows each chunk it yields to a scanner.
#[derive(Debug)]
pub struct ScanReader<R, S> {
    inner: R,
    scanner: S,
}

impl<R, S> ScanReader<R, S> {
    /// Wrap `inner`, reporting everything read from it to `scanner`.
    pub fn new(inner: R, scanner: S) -> Self {
        Self { inner, scanner }
    }

    /// Drop the source and keep the scanner.
    pub fn into_scanner(self) -> S {
        self.scanner
    }
}

impl<R, S> AsyncRead for ScanReader<R, S>
where
    R: AsyncRead + Unpin,
    S: StreamScanner + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        if !fresh.is_empty() {
            this.scanner.observe(fresh);
        }
        Poll::Ready(Ok(()))
    }
}

/// Whether a scanner wants to see further frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Incremental pkt-line splitter shared by the scanners.
///
/// Holds at most one incomplete frame between calls. After a framing
/// error or a [`Flow::Stop`] it discards everything it is given.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    buf: BytesMut,
    codec: PktLineCodec,
    stopped: bool,
}

impl FrameBuffer {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub(crate) fn push(&mut self, bytes: &[u8], mut on_packet: impl FnMut(Packet) -> Flow) {
        if self.stopped {
            return;
        }
        self.buf.extend_from_slice(bytes);
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(packet)) => {
                    if on_packet(packet) == Flow::Stop {
                        self.stop();
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    debug!(%err, "stream is not pkt-line framed, scanning stopped");
                    self.stop();
                    return;
                }
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.buf = BytesMut::new();
    }
}

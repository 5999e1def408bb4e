//! Inbound error-band scanner.
//!
//! git can exit successfully and still report a failure to the client,
//! either on sideband channel 3 or as an `ERR` packet. The scanner keeps
//! the first such message; output is never held back or cut short.

use crate::pktline::Packet;
use crate::AppError;

use super::{Flow, FrameBuffer, StreamScanner};

/// Sideband channel carrying fatal error text.
pub const ERROR_CHANNEL: u8 = 3;

/// Records the first error band found in git's output.
#[derive(Debug, Default)]
pub struct SidebandScanner {
    frames: FrameBuffer,
    error: Option<String>,
}

impl SidebandScanner {
    /// Create a scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The error message found so far, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The recorded failure as a tool error.
    #[must_use]
    pub fn into_error(self) -> Option<AppError> {
        self.error.map(AppError::Tool)
    }
}

impl StreamScanner for SidebandScanner {
    fn observe(&mut self, bytes: &[u8]) {
        let error = &mut self.error;
        self.frames.push(bytes, |packet| {
            let Packet::Data(data) = packet else {
                return Flow::Continue;
            };
            let message = match data.first() {
                Some(&ERROR_CHANNEL) => &data[1..],
                _ => match data.strip_prefix(b"ERR ") {
                    Some(rest) => rest,
                    None => return Flow::Continue,
                },
            };
            let text = String::from_utf8_lossy(message).trim().to_owned();
            *error = Some(if text.is_empty() {
                "git reported an error".to_owned()
            } else {
                text
            });
            Flow::Stop
        });
    }
}

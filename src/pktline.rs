//! pkt-line framing.
//!
//! Every git protocol message is prefixed with four lowercase hex digits
//! holding the length of the whole line, header included. Lengths below
//! four are control packets that carry no payload:
//!
//! | Header | Meaning                         |
//! |--------|---------------------------------|
//! | `0000` | flush, end of a section         |
//! | `0001` | delimiter (protocol v2)         |
//! | `0002` | response end (protocol v2)      |
//!
//! [`write_packet`] and [`flush_packet`] build the two frames the bridge
//! emits itself. [`PktLineCodec`] decodes the frames the scanners observe
//! and plugs into [`tokio_util::codec`] like any other codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Largest frame git will produce or accept, header included.
pub const MAX_PACKET_LEN: usize = 65520;

/// The flush frame.
pub const FLUSH: &[u8; 4] = b"0000";

/// Frame `payload` as a data packet terminated by a newline.
///
/// The header counts itself, the payload and the trailing `\n`.
#[must_use]
pub fn write_packet(payload: &str) -> Vec<u8> {
    let len = HEADER_LEN + payload.len() + 1;
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(payload.as_bytes());
    out.push(b'\n');
    out
}

/// The flush frame as an owned buffer.
#[must_use]
pub fn flush_packet() -> Vec<u8> {
    FLUSH.to_vec()
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `0000`: end of a section.
    Flush,
    /// `0001`: section delimiter.
    Delimiter,
    /// `0002`: end of a stateless response.
    ResponseEnd,
    /// A data frame's payload, header stripped, trailing newline kept.
    Data(Bytes),
}

impl Packet {
    /// Payload without its trailing newline, if this is a data frame.
    #[must_use]
    pub fn text(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data.strip_suffix(b"\n").unwrap_or(&data[..])),
            _ => None,
        }
    }
}

/// Streaming pkt-line decoder and encoder.
///
/// The decoder holds at most one incomplete frame in its buffer; it
/// returns `Ok(None)` until that frame is complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct PktLineCodec;

impl PktLineCodec {
    /// Create a codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PktLineCodec {
    type Item = Packet;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = parse_header(&src[..HEADER_LEN])?;
        let control = match len {
            0 => Some(Packet::Flush),
            1 => Some(Packet::Delimiter),
            2 => Some(Packet::ResponseEnd),
            3 | 4 => {
                return Err(AppError::Protocol(format!("invalid packet length {len}")));
            }
            n if n > MAX_PACKET_LEN => {
                return Err(AppError::Protocol(format!(
                    "packet length {n} exceeds {MAX_PACKET_LEN}"
                )));
            }
            _ => None,
        };
        if let Some(packet) = control {
            src.advance(HEADER_LEN);
            return Ok(Some(packet));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(len);
        frame.advance(HEADER_LEN);
        Ok(Some(Packet::Data(frame.freeze())))
    }
}

impl Encoder<Packet> for PktLineCodec {
    type Error = AppError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        match item {
            Packet::Flush => dst.put_slice(FLUSH),
            Packet::Delimiter => dst.put_slice(b"0001"),
            Packet::ResponseEnd => dst.put_slice(b"0002"),
            Packet::Data(data) => {
                let len = HEADER_LEN + data.len();
                if len > MAX_PACKET_LEN {
                    return Err(AppError::Protocol(format!(
                        "payload of {} bytes does not fit in one packet",
                        data.len()
                    )));
                }
                dst.reserve(len);
                dst.put_slice(format!("{len:04x}").as_bytes());
                dst.put_slice(&data);
            }
        }
        Ok(())
    }
}

fn parse_header(header: &[u8]) -> Result<usize> {
    if !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(AppError::Protocol(format!(
            "invalid packet header {:?}",
            String::from_utf8_lossy(header)
        )));
    }
    let text = std::str::from_utf8(header)
        .map_err(|_| AppError::Protocol("non-ascii packet header".into()))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| AppError::Protocol(format!("invalid packet header {text:?}")))
}

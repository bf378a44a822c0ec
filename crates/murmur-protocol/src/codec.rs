//! Server-Sent Events codec for Murmur.
//!
//! Notifications are serialized to compact JSON once and framed as
//! `data: <json>\n\n`. Idle streams carry comment frames (`: keepalive\n\n`),
//! which clients ignore.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::payload::NotificationPayload;

/// Maximum size of a single buffered frame when decoding (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Field prefix for data lines.
const DATA_PREFIX: &[u8] = b"data: ";

/// Frame terminator.
const FRAME_END: &[u8] = b"\n\n";

/// Comment frame written on idle streams.
const KEEPALIVE: &[u8] = b": keepalive\n\n";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffered frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// A decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Concatenated `data:` lines.
    Data(Bytes),
    /// A comment frame (text after the leading `:`).
    Comment(Bytes),
}

impl SseFrame {
    /// The data carried by a `Data` frame.
    #[must_use]
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            SseFrame::Data(data) => Some(data),
            SseFrame::Comment(_) => None,
        }
    }
}

/// Serialize a notification payload to compact JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_payload(payload: &NotificationPayload) -> Result<Bytes, ProtocolError> {
    let json = serde_json::to_vec(payload)?;
    Ok(Bytes::from(json))
}

/// Wrap serialized data in an SSE event frame.
///
/// Each line of `data` becomes its own `data:` field so that embedded newlines
/// survive the framing.
#[must_use]
pub fn event_frame(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_PREFIX.len() + data.len() + FRAME_END.len());
    for line in data.split(|b| *b == b'\n') {
        buf.put_slice(DATA_PREFIX);
        buf.put_slice(line);
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
    buf.freeze()
}

/// The comment frame sent to keep idle streams alive.
#[must_use]
pub fn keepalive_frame() -> Bytes {
    Bytes::from_static(KEEPALIVE)
}

/// Try to decode one frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the buffered frame is too large or has no fields.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<SseFrame>, ProtocolError> {
    let Some(end) = buf.windows(FRAME_END.len()).position(|w| w == FRAME_END) else {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(buf.len()));
        }
        return Ok(None);
    };

    if end > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(end));
    }

    let raw = buf.split_to(end);
    buf.advance(FRAME_END.len());

    let mut data = BytesMut::new();
    let mut saw_data = false;
    let mut comment = None;

    for line in raw[..].split(|b| *b == b'\n') {
        if let Some(value) = line.strip_prefix(b"data:") {
            let value = value.strip_prefix(b" ").unwrap_or(value);
            if saw_data {
                data.put_u8(b'\n');
            }
            data.put_slice(value);
            saw_data = true;
        } else if let Some(text) = line.strip_prefix(b":") {
            let text = text.strip_prefix(b" ").unwrap_or(text);
            comment.get_or_insert_with(|| Bytes::copy_from_slice(text));
        }
    }

    if saw_data {
        return Ok(Some(SseFrame::Data(data.freeze())));
    }
    match comment {
        Some(text) => Ok(Some(SseFrame::Comment(text))),
        None => Err(ProtocolError::Invalid(
            String::from_utf8_lossy(&raw).into_owned(),
        )),
    }
}

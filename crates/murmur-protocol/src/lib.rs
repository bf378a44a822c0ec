//! # murmur-protocol
//!
//! Wire definitions for the Murmur chat notification service.
//!
//! This crate defines what travels over HTTP between Murmur clients and the
//! server: the notification payload pushed to every stream subscriber, the
//! ingest request/response bodies, and the Server-Sent Events framing.
//!
//! ## Event stream
//!
//! Every notification is one SSE frame:
//!
//! ```text
//! data: {"username":"User1","content":"hi","timestamp":"2024-05-01 12:00:00"}\n\n
//! ```
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, NotificationPayload, SseFrame};
//!
//! let payload = NotificationPayload::new("User1", "hi", "2024-05-01 12:00:00");
//! let json = codec::encode_payload(&payload).unwrap();
//! let frame = codec::event_frame(&json);
//!
//! let mut buf = bytes::BytesMut::from(&frame[..]);
//! let decoded = codec::decode_from(&mut buf).unwrap();
//! assert_eq!(decoded, Some(SseFrame::Data(json)));
//! ```

pub mod codec;
pub mod payload;

pub use codec::{decode_from, encode_payload, event_frame, ProtocolError, SseFrame};
pub use payload::{
    NotificationPayload, SendMessageRequest, SendMessageResponse, TIMESTAMP_FORMAT,
};

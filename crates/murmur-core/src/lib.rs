//! # murmur-core
//!
//! Real-time fan-out of chat messages to connected viewers.
//!
//! This crate provides the building blocks behind the Murmur server:
//!
//! - **Store** - Persistence collaborator for users and messages
//! - **Payload** - Builds the notification record for a stored message
//! - **Registry** - The set of live subscriber channels
//! - **Broadcaster** - Delivers one payload to every registered subscriber
//! - **Session** - Per-connection streaming loop with guaranteed cleanup
//! - **Ingest** - Validate, persist, then broadcast a new message
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Ingest    │────▶│ Broadcaster │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌─────────────┐                         ┌─────────────┐
//! │    Store    │                         │  Session(s) │
//! └─────────────┘                         └─────────────┘
//! ```

pub mod broadcast;
pub mod ingest;
pub mod payload;
pub mod registry;
pub mod session;
pub mod store;

pub use broadcast::{Broadcaster, PublishReport};
pub use ingest::{Ingest, IngestConfig, IngestError, Ingested};
pub use payload::build_payload;
pub use registry::{DeliveryError, SubscriberHandle, SubscriberId, SubscriberRegistry, Subscription};
pub use session::{SessionConfig, SessionState, StreamingSession};
pub use store::{MemoryStore, Message, Store, StoreError, User, UserId};

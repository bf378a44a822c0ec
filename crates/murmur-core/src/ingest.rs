//! Message ingest: validate, persist, then broadcast.
//!
//! Persistence is the source of truth. Broadcast is best-effort live
//! notification and never rolls back or fails a stored message.
//!
//! Persist and publish run as one ordered step, so every subscriber sees
//! messages in the order the store committed them.

use murmur_protocol::SendMessageRequest;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::broadcast::{Broadcaster, PublishReport};
use crate::payload::build_payload;
use crate::store::{Message, Store, StoreError, UserId};

/// Default maximum message length in characters.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 4096;

/// Ingest errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed request. Nothing was stored or broadcast.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The store rejected or failed the write. Nothing was broadcast.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// Ingest configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum message length in characters.
    pub max_content_length: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

/// A stored and broadcast message.
#[derive(Debug, Clone)]
pub struct Ingested {
    /// The persisted message.
    pub message: Message,
    /// Fan-out result.
    pub report: PublishReport,
}

/// Accepts new messages on behalf of the `send_message` endpoint.
#[derive(Clone)]
pub struct Ingest {
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    config: IngestConfig,
    commit: Arc<Mutex<()>>,
}

impl Ingest {
    /// Create an ingest pipeline.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, broadcaster: Broadcaster, config: IngestConfig) -> Self {
        Self {
            store,
            broadcaster,
            config,
            commit: Arc::new(Mutex::new(())),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Validate, persist and broadcast one message.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a missing `user_id`, missing or blank
    /// `content`, or content over the configured length; `Persistence` if the
    /// store fails. No broadcast happens on error.
    pub async fn send(&self, request: SendMessageRequest) -> Result<Ingested, IngestError> {
        let (user_id, content) = self.validate(request)?;

        // Held until the payload is enqueued: delivery order is commit order.
        let commit = self.commit.lock().await;
        let message = self.store.persist(&content, user_id).await?;
        let author = self.store.author(&message).await?;

        let payload = build_payload(&message, &author);
        let report = self.broadcaster.publish_payload(&payload);
        drop(commit);

        if report.anomalies > 0 {
            warn!(
                message_id = message.id,
                anomalies = report.anomalies,
                "Some subscribers were unreachable"
            );
        }
        debug!(
            message_id = message.id,
            user_id,
            recipients = report.delivered,
            "Message ingested"
        );

        Ok(Ingested { message, report })
    }

    fn validate(&self, request: SendMessageRequest) -> Result<(UserId, String), IngestError> {
        let user_id = request
            .user_id
            .ok_or_else(|| IngestError::Validation("missing field `user_id`".to_string()))?;

        let content = request
            .content
            .ok_or_else(|| IngestError::Validation("missing field `content`".to_string()))?;

        if content.trim().is_empty() {
            return Err(IngestError::Validation(
                "`content` must not be empty".to_string(),
            ));
        }

        let length = content.chars().count();
        if length > self.config.max_content_length {
            return Err(IngestError::Validation(format!(
                "`content` is {length} characters, maximum is {}",
                self.config.max_content_length
            )));
        }

        Ok((user_id, content))
    }
}

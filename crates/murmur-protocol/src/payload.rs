//! Payload types exchanged with Murmur clients.
//!
//! All bodies are JSON. Field names are part of the wire contract.

use serde::{Deserialize, Serialize};

/// `strftime` pattern for notification timestamps.
///
/// Second precision, no timezone suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The event record pushed to every stream subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Author's username.
    pub username: String,
    /// Message text.
    pub content: String,
    /// Persist time, formatted with [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
}

impl NotificationPayload {
    /// Create a new payload.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Body of `POST /send_message`.
///
/// Both fields are optional at the serde level so that a missing field is
/// reported as a validation failure instead of a deserialization rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Author of the message.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Message text.
    #[serde(default)]
    pub content: Option<String>,
}

impl SendMessageRequest {
    /// Create a complete request.
    #[must_use]
    pub fn new(user_id: i64, content: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            content: Some(content.into()),
        }
    }
}

/// Response body of `POST /send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// `"success"` or `"error"`.
    pub status: String,
    /// Human readable reason when `status` is `"error"`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl SendMessageResponse {
    /// The acknowledgment returned after a message was stored.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            error: None,
        }
    }

    /// A rejection carrying a reason.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(reason.into()),
        }
    }

    /// Whether this is a success acknowledgment.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

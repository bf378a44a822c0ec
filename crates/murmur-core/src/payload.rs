//! Notification payload construction.

use murmur_protocol::{NotificationPayload, TIMESTAMP_FORMAT};

use crate::store::{Message, User};

/// Build the notification record for a stored message.
///
/// `author` must be the message's resolved author. The timestamp is rendered
/// as stored, without timezone conversion.
#[must_use]
pub fn build_payload(message: &Message, author: &User) -> NotificationPayload {
    debug_assert_eq!(message.user_id, author.id);

    NotificationPayload {
        username: author.username.clone(),
        content: message.content.clone(),
        timestamp: message.timestamp.format(TIMESTAMP_FORMAT).to_string(),
    }
}

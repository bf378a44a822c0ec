//! Persistence collaborator for Murmur.
//!
//! The fan-out core only needs two things from storage: persist a message and
//! resolve its author. The [`Store`] trait captures that plus the listing
//! calls used by the HTTP surface. [`MemoryStore`] is the in-process
//! implementation the server runs with.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// A user identifier.
pub type UserId = i64;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No user with this id.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// Username already taken.
    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    /// Backend failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: UserId,
    /// Unique display name.
    pub username: String,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, increasing in commit order.
    pub id: i64,
    /// Message text.
    pub content: String,
    /// Author reference.
    pub user_id: UserId,
    /// Persist time (UTC, no timezone attached).
    pub timestamp: NaiveDateTime,
}

/// Persistence for users and messages.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new message authored by `user_id`.
    async fn persist(&self, content: &str, user_id: UserId) -> Result<Message, StoreError>;

    /// Resolve the author of a stored message.
    async fn author(&self, message: &Message) -> Result<User, StoreError>;

    /// Create a user with a unique username.
    async fn create_user(&self, username: &str) -> Result<User, StoreError>;

    /// All users, ordered by id.
    async fn users(&self) -> Result<Vec<User>, StoreError>;

    /// All messages, in commit order.
    async fn messages(&self) -> Result<Vec<Message>, StoreError>;
}

/// In-memory [`Store`].
///
/// Messages are appended under a single write lock, so commit order and id
/// order agree.
#[derive(Debug)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    usernames: DashMap<String, UserId>,
    next_user_id: AtomicI64,
    messages: RwLock<Vec<Message>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            usernames: DashMap::new(),
            next_user_id: AtomicI64::new(1),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Create a store seeded with the given usernames.
    ///
    /// Ids are assigned from 1 in iteration order; duplicates are skipped.
    #[must_use]
    pub fn with_users<I, S>(usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for name in usernames {
            let _ = store.insert_user(name.into());
        }
        store
    }

    /// Number of stored users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn insert_user(&self, username: String) -> Result<User, StoreError> {
        match self.usernames.entry(username) {
            Entry::Occupied(entry) => Err(StoreError::DuplicateUsername(entry.key().clone())),
            Entry::Vacant(entry) => {
                let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
                let user = User {
                    id,
                    username: entry.key().clone(),
                };
                entry.insert(id);
                self.users.insert(id, user.clone());
                debug!(user_id = id, username = %user.username, "User created");
                Ok(user)
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("message log lock poisoned".to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn persist(&self, content: &str, user_id: UserId) -> Result<Message, StoreError> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::UnknownUser(user_id));
        }

        let mut messages = self.messages.write().map_err(|_| poisoned())?;
        let message = Message {
            id: messages.len() as i64 + 1,
            content: content.to_string(),
            user_id,
            timestamp: Utc::now().naive_utc(),
        };
        messages.push(message.clone());

        debug!(message_id = message.id, user_id, "Message persisted");
        Ok(message)
    }

    async fn author(&self, message: &Message) -> Result<User, StoreError> {
        self.users
            .get(&message.user_id)
            .map(|u| u.value().clone())
            .ok_or(StoreError::UnknownUser(message.user_id))
    }

    async fn create_user(&self, username: &str) -> Result<User, StoreError> {
        self.insert_user(username.to_string())
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn messages(&self) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().map_err(|_| poisoned())?;
        Ok(messages.clone())
    }
}

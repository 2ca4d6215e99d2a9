mod sqlite;

pub use sqlite::SqliteChatStore;

use std::fmt;

use async_trait::async_trait;

use crate::types::MessageDocuments;

/// A chat listed for the picker UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    pub id: i64,
    pub slug: Option<String>,
}

/// Durable append-only message log per chat, plus user accounts.
///
/// Errors from this trait are never masked by the callers above it — a lost
/// append would silently fork the in-memory log from the durable one.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_user(&self, user_name: &str) -> Result<i64, StoreError>;
    async fn check_user(&self, user_name: &str) -> Result<Option<i64>, StoreError>;
    async fn get_users(&self) -> Result<Vec<(i64, String)>, StoreError>;

    /// Create a chat seeded with its initial (system) message; returns the
    /// assigned chat id.
    async fn create_chat(
        &self,
        user_id: i64,
        init_message: &MessageDocuments,
    ) -> Result<i64, StoreError>;

    /// Append one message to a chat's log; returns the message row id.
    async fn insert_message(
        &self,
        chat_id: i64,
        msg_docs: &MessageDocuments,
    ) -> Result<i64, StoreError>;

    /// Whether `chat_id` exists and belongs to `user_id`.
    async fn chat_exists(&self, user_id: i64, chat_id: i64) -> Result<bool, StoreError>;

    /// The full ordered log as (message blob, documents blob) pairs, or None
    /// when no chat has that id.
    async fn get_messages(
        &self,
        chat_id: i64,
    ) -> Result<Option<Vec<(String, Option<String>)>>, StoreError>;

    async fn get_chats(&self, user_id: i64) -> Result<Vec<ChatSummary>, StoreError>;
    async fn add_slug(&self, chat_id: i64, slug: &str) -> Result<(), StoreError>;
    async fn get_slug(&self, chat_id: i64) -> Result<Option<String>, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    /// Duplicate user creation — recoverable, the caller can prompt for
    /// a different name.
    UserAlreadyExists(String),
    UserNotFound(String),
    ChatNotFound(i64),
    Database(sqlx::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UserAlreadyExists(name) => write!(f, "User '{}' already exists", name),
            StoreError::UserNotFound(name) => write!(f, "User '{}' not found", name),
            StoreError::ChatNotFound(id) => write!(f, "Chat {} not found", id),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

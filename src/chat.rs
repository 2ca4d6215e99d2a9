use std::sync::Arc;

use tracing::info;

use crate::state::{ChatStore, StoreError};
use crate::types::{Message, MessageDocuments};

const SLUG_CHARS: usize = 50;

/// One conversation: the in-memory message log plus its durable row.
///
/// Every append goes to the store first and only reaches the in-memory log
/// once the store accepts it, so the two can never disagree about what was
/// said.
pub struct Chat {
    store: Arc<dyn ChatStore>,
    pub id: Option<i64>,
    user_id: i64,
    slug: Option<String>,
    messages: Vec<MessageDocuments>,
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("slug", &self.slug)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

impl Chat {
    /// A fresh chat seeded with the system prompt. Nothing is persisted
    /// until `init` runs on the first user turn.
    pub fn new(store: Arc<dyn ChatStore>, user_id: i64, system_prompt: &str) -> Self {
        Self {
            store,
            id: None,
            user_id,
            slug: None,
            messages: vec![MessageDocuments::bare(Message::system(system_prompt))],
        }
    }

    /// Rebuild a chat from its stored log. A chat belonging to a different
    /// user is indistinguishable from a missing one.
    pub async fn load(
        store: Arc<dyn ChatStore>,
        user_id: i64,
        chat_id: i64,
    ) -> Result<Self, StoreError> {
        if !store.chat_exists(user_id, chat_id).await? {
            return Err(StoreError::ChatNotFound(chat_id));
        }
        let rows = store
            .get_messages(chat_id)
            .await?
            .ok_or(StoreError::ChatNotFound(chat_id))?;

        let mut messages = Vec::with_capacity(rows.len());
        for (message_blob, documents_blob) in rows {
            let message: Message = serde_json::from_str(&message_blob)
                .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
            let documents = documents_blob
                .map(|blob| serde_json::from_str(&blob))
                .transpose()
                .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
            messages.push(MessageDocuments {
                message,
                documents,
            });
        }

        let slug = store.get_slug(chat_id).await?;
        info!(chat_id, count = messages.len(), "loaded chat");

        Ok(Self {
            store,
            id: Some(chat_id),
            user_id,
            slug,
            messages,
        })
    }

    pub fn messages(&self) -> &[MessageDocuments] {
        &self.messages
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Persist the chat row with its seed message, then append the first
    /// user prompt.
    pub async fn init(&mut self, prompt: &str) -> Result<(), StoreError> {
        let chat_id = self.store.create_chat(self.user_id, &self.messages[0]).await?;
        self.id = Some(chat_id);
        info!(chat_id, user_id = self.user_id, "created chat");
        self.add_message(MessageDocuments::bare(Message::user(prompt)))
            .await?;
        self.ensure_slug().await?;
        Ok(())
    }

    /// Append to the durable log, then to the in-memory one.
    pub async fn add_message(&mut self, msg_docs: MessageDocuments) -> Result<(), StoreError> {
        let chat_id = self.id.ok_or(StoreError::ChatNotFound(0))?;
        self.store.insert_message(chat_id, &msg_docs).await?;
        self.messages.push(msg_docs);
        Ok(())
    }

    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    /// Derive and store the slug once, from the first non-system message.
    async fn ensure_slug(&mut self) -> Result<(), StoreError> {
        if self.slug.is_some() {
            return Ok(());
        }
        let Some(chat_id) = self.id else {
            return Ok(());
        };
        let source = self
            .messages
            .iter()
            .find(|m| m.message.role != crate::types::Role::System)
            .and_then(|m| m.message.content.as_deref());
        let Some(text) = source else {
            return Ok(());
        };

        let mut slug: String = text.chars().take(SLUG_CHARS).collect();
        slug.push_str("...");
        self.store.add_slug(chat_id, &slug).await?;
        self.slug = Some(slug);
        Ok(())
    }
}

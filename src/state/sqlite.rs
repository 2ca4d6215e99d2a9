use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::state::{ChatStore, ChatSummary, StoreError};
use crate::types::MessageDocuments;

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// An isolated in-memory store, one connection so every query sees the
    /// same database.
    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_name TEXT NOT NULL UNIQUE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                slug TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                documents TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn blobs_for(msg_docs: &MessageDocuments) -> Result<(String, Option<String>), StoreError> {
        let message = serde_json::to_string(&msg_docs.message)
            .map_err(|e| StoreError::Database(sqlx::Error::Encode(Box::new(e))))?;
        let documents = msg_docs
            .documents
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Database(sqlx::Error::Encode(Box::new(e))))?;
        Ok((message, documents))
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_user(&self, user_name: &str) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO users (user_name) VALUES (?)")
            .bind(user_name)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::UserAlreadyExists(user_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn check_user(&self, user_name: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT id FROM users WHERE user_name = ?")
            .bind(user_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn get_users(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = sqlx::query("SELECT id, user_name FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("id"), r.get("user_name")))
            .collect())
    }

    async fn create_chat(
        &self,
        user_id: i64,
        init_message: &MessageDocuments,
    ) -> Result<i64, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let chat_id = sqlx::query("INSERT INTO chats (user_id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let (message, documents) = Self::blobs_for(init_message)?;
        sqlx::query(
            "INSERT INTO messages (chat_id, message, documents, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(&message)
        .bind(&documents)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(chat_id)
    }

    async fn insert_message(
        &self,
        chat_id: i64,
        msg_docs: &MessageDocuments,
    ) -> Result<i64, StoreError> {
        let (message, documents) = Self::blobs_for(msg_docs)?;
        let done = sqlx::query(
            "INSERT INTO messages (chat_id, message, documents, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(&message)
        .bind(&documents)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(done.last_insert_rowid())
    }

    async fn chat_exists(&self, user_id: i64, chat_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT id FROM chats WHERE id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get_messages(
        &self,
        chat_id: i64,
    ) -> Result<Option<Vec<(String, Option<String>)>>, StoreError> {
        let exists = sqlx::query("SELECT id FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT message, documents FROM messages WHERE chat_id = ? ORDER BY id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(
            rows.into_iter()
                .map(|r| (r.get("message"), r.get("documents")))
                .collect(),
        ))
    }

    async fn get_chats(&self, user_id: i64) -> Result<Vec<ChatSummary>, StoreError> {
        let rows = sqlx::query("SELECT id, slug FROM chats WHERE user_id = ? ORDER BY id DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ChatSummary {
                id: r.get("id"),
                slug: r.get("slug"),
            })
            .collect())
    }

    async fn add_slug(&self, chat_id: i64, slug: &str) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE chats SET slug = ? WHERE id = ?")
            .bind(slug)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::ChatNotFound(chat_id));
        }
        Ok(())
    }

    async fn get_slug(&self, chat_id: i64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT slug FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ChatNotFound(chat_id))?;
        Ok(row.get("slug"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    async fn store() -> SqliteChatStore {
        SqliteChatStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_check_user() {
        let s = store().await;
        let id = s.create_user("alice").await.unwrap();
        assert_eq!(s.check_user("alice").await.unwrap(), Some(id));
        assert_eq!(s.check_user("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_user_is_already_exists() {
        let s = store().await;
        s.create_user("alice").await.unwrap();
        let err = s.create_user("alice").await.unwrap_err();
        assert!(matches!(err, StoreError::UserAlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_chat_seeds_initial_message() {
        let s = store().await;
        let user_id = s.create_user("alice").await.unwrap();
        let init = MessageDocuments::bare(Message::system("system prompt"));
        let chat_id = s.create_chat(user_id, &init).await.unwrap();

        let rows = s.get_messages(chat_id).await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        let msg: Message = serde_json::from_str(&rows[0].0).unwrap();
        assert_eq!(msg.content.as_deref(), Some("system prompt"));
        assert!(rows[0].1.is_none());
    }

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let s = store().await;
        let user_id = s.create_user("alice").await.unwrap();
        let chat_id = s
            .create_chat(user_id, &MessageDocuments::bare(Message::system("sys")))
            .await
            .unwrap();
        s.insert_message(chat_id, &MessageDocuments::bare(Message::user("first")))
            .await
            .unwrap();
        s.insert_message(chat_id, &MessageDocuments::bare(Message::assistant("second")))
            .await
            .unwrap();

        let rows = s.get_messages(chat_id).await.unwrap().unwrap();
        let contents: Vec<String> = rows
            .iter()
            .map(|(blob, _)| {
                serde_json::from_str::<Message>(blob)
                    .unwrap()
                    .content
                    .unwrap()
            })
            .collect();
        assert_eq!(contents, vec!["sys", "first", "second"]);
    }

    #[tokio::test]
    async fn chat_exists_is_scoped_to_owner() {
        let s = store().await;
        let alice = s.create_user("alice").await.unwrap();
        let bob = s.create_user("bob").await.unwrap();
        let chat_id = s
            .create_chat(alice, &MessageDocuments::bare(Message::system("sys")))
            .await
            .unwrap();

        assert!(s.chat_exists(alice, chat_id).await.unwrap());
        assert!(!s.chat_exists(bob, chat_id).await.unwrap());
        assert!(!s.chat_exists(alice, chat_id + 1).await.unwrap());
    }

    #[tokio::test]
    async fn missing_chat_returns_none() {
        let s = store().await;
        assert!(s.get_messages(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slug_round_trip_and_listing() {
        let s = store().await;
        let user_id = s.create_user("alice").await.unwrap();
        let chat_id = s
            .create_chat(user_id, &MessageDocuments::bare(Message::system("sys")))
            .await
            .unwrap();

        assert_eq!(s.get_slug(chat_id).await.unwrap(), None);
        s.add_slug(chat_id, "What does GDPR say...").await.unwrap();
        assert_eq!(
            s.get_slug(chat_id).await.unwrap().as_deref(),
            Some("What does GDPR say...")
        );

        let chats = s.get_chats(user_id).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].slug.as_deref(), Some("What does GDPR say..."));
    }

    #[tokio::test]
    async fn slug_for_missing_chat_is_not_found() {
        let s = store().await;
        assert!(matches!(
            s.add_slug(42, "x").await.unwrap_err(),
            StoreError::ChatNotFound(42)
        ));
        assert!(matches!(
            s.get_slug(42).await.unwrap_err(),
            StoreError::ChatNotFound(42)
        ));
    }
}

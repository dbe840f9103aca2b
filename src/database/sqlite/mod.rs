use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use tracing::{debug, info};

use crate::memory::ConversationStore;
use crate::model::Message;
use crate::{DocIntelError, Result};

pub use models::{NewStoredMessage, StoredMessage};


pub mod models;

pub type DbPool = Pool<Sqlite>;

fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> DocIntelError + '_ {
    move |e| DocIntelError::Database(format!("{context}: {e}"))
}

/// Conversation memory persisted in SQLite, windowed per conversation
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: DbPool,
    max_messages: usize,
}

impl SqliteConversationStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P, max_messages: usize) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error("Failed to create database connection pool"))?;

        let store = Self {
            pool,
            max_messages: max_messages.max(1),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path, max_messages: usize) -> Result<Self> {
        std::fs::create_dir_all(config_dir).map_err(|e| {
            DocIntelError::Database(format!(
                "Failed to create config directory {}: {e}",
                config_dir.display()
            ))
        })?;
        Self::new(config_dir.join("conversations.db"), max_messages).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to run schema migration: {e}")))?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Conversation ids with stored messages, most recently active first
    #[inline]
    pub async fn conversation_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT conversation_id FROM messages GROUP BY conversation_id ORDER BY MAX(id) DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list conversations"))
    }

    async fn insert(conn: &mut SqliteConnection, conversation_id: &str, message: &Message) -> Result<()> {
        let row = NewStoredMessage::from_message(conversation_id, message)?;
        sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(row.conversation_id)
        .bind(row.role)
        .bind(row.content)
        .bind(row.metadata)
        .bind(row.created_at)
        .execute(conn)
        .await
        .map_err(db_error("Failed to append message"))?;
        Ok(())
    }

    async fn evict(&self, conn: &mut SqliteConnection, conversation_id: &str) -> Result<()> {
        let evicted = sqlx::query(
            r"
            DELETE FROM messages
            WHERE conversation_id = ?
              AND id NOT IN (
                  SELECT id FROM messages
                  WHERE conversation_id = ?
                  ORDER BY id DESC
                  LIMIT ?
              )
            ",
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(self.window())
        .execute(conn)
        .await
        .map_err(db_error("Failed to trim conversation"))?
        .rows_affected();

        if evicted > 0 {
            debug!(
                "Evicted {} old messages from conversation {}",
                evicted, conversation_id
            );
        }
        Ok(())
    }

    /// Inserts `messages` and trims the window in one transaction
    async fn append_turn_messages(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        for message in messages {
            Self::insert(&mut *tx, conversation_id, message).await?;
        }
        self.evict(&mut *tx, conversation_id).await?;
        tx.commit()
            .await
            .map_err(db_error("Failed to commit conversation update"))?;
        Ok(())
    }

    fn window(&self) -> i64 {
        i64::try_from(self.max_messages).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    #[inline]
    async fn append(&self, conversation_id: &str, message: Message) -> Result<()> {
        self.append_turn_messages(conversation_id, &[message]).await
    }

    #[inline]
    async fn read(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows: Vec<StoredMessage> = sqlx::query_as(
            r"
            SELECT id, conversation_id, role, content, metadata, created_at
            FROM (
                SELECT * FROM messages
                WHERE conversation_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            ORDER BY id ASC
            ",
        )
        .bind(conversation_id)
        .bind(self.window())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to read conversation"))?;

        rows.into_iter().map(Message::try_from).collect()
    }

    #[inline]
    async fn clear(&self, conversation_id: &str) -> Result<()> {
        let removed = sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to clear conversation"))?
            .rows_affected();
        info!(
            "Cleared {} messages from conversation {}",
            removed, conversation_id
        );
        Ok(())
    }

    #[inline]
    async fn append_turn(&self, conversation_id: &str, user: Message, assistant: Message) -> Result<()> {
        self.append_turn_messages(conversation_id, &[user, assistant])
            .await
    }
}

//! Repository for conversation and message operations.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::ChatDb;
use super::models::{Conversation, Message, MessageRole};

/// Storage-layer errors.
///
/// `NotFound` is a normal outcome callers recover from; `Storage` is an
/// I/O-level failure fatal to the specific operation only.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("storage failure")]
    Storage(#[from] sqlx::Error),
}

/// Strongly consistent store for conversations and messages.
///
/// Knows nothing about networking or streaming; the session manager and
/// the REST handlers are its only callers.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: ChatDb,
}

impl ConversationStore {
    pub fn new(db: ChatDb) -> Self {
        Self { db }
    }

    /// List all conversations, most recently updated first.
    ///
    /// Display ordering (pinned-first, recency buckets) is the client's
    /// concern, not the store's.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, title, pinned, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(conversations)
    }

    /// Fetch a single conversation, if it exists.
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, title, pinned, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(conversation)
    }

    /// Create a fresh, untitled, unpinned conversation.
    pub async fn create_conversation(&self) -> Result<Conversation, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = now_ms();

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, pinned, created_at, updated_at)
            VALUES (?, NULL, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        debug!(conversation_id = %id, "created conversation");

        Ok(Conversation {
            id,
            title: None,
            pinned: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Delete a conversation and all of its messages.
    ///
    /// Idempotent: deleting an unknown id is a no-op.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            conversation_id = %id,
            existed = result.rows_affected() > 0,
            "deleted conversation"
        );

        Ok(())
    }

    /// Set a conversation's title and bump `updated_at`.
    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET title = ?, updated_at = MAX(updated_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(now_ms())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Pin a conversation. Idempotent; unknown ids are a no-op.
    pub async fn pin_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.set_pinned(id, true).await
    }

    /// Unpin a conversation. Idempotent; unknown ids are a no-op.
    pub async fn unpin_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.set_pinned(id, false).await
    }

    async fn set_pinned(&self, id: &str, pinned: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET pinned = ?, updated_at = MAX(updated_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(pinned)
        .bind(now_ms())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Return the complete ordered history for a conversation.
    ///
    /// Ordering is by `created_at` with insertion sequence as tie-break,
    /// so it is stable and total. Unknown ids yield an empty list.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(messages)
    }

    /// Append a message and bump the parent conversation's `updated_at`.
    ///
    /// Fails with `NotFound` if the conversation no longer exists (it may
    /// have been deleted while a stream was in flight).
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = now_ms();

        let mut tx = self.db.pool().begin().await?;

        let bumped = sqlx::query(
            "UPDATE conversations SET updated_at = MAX(updated_at, ?) WHERE id = ?",
        )
        .bind(now)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.to_string())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

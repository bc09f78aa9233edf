//! Conversation state persistence
//!
//! Keyed by chat id, one state per chat. A `put` replaces whatever was stored,
//! so two flows started concurrently for one chat end with the later write.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::state::ConversationState;
use crate::core_types::ChatId;
use crate::store::StoreError;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, chat_id: ChatId) -> Result<Option<ConversationState>, StoreError>;

    async fn put(&self, state: &ConversationState) -> Result<(), StoreError>;

    async fn clear(&self, chat_id: ChatId) -> Result<(), StoreError>;

    /// Remove and return the state; of two concurrent calls at most one gets it
    async fn take(&self, chat_id: ChatId) -> Result<Option<ConversationState>, StoreError>;
}

/// In-process conversation store
#[derive(Debug, Clone, Default)]
pub struct MemoryConversationStore {
    states: Arc<DashMap<ChatId, ConversationState>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(&self, chat_id: ChatId) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.states.get(&chat_id).map(|s| s.value().clone()))
    }

    async fn put(&self, state: &ConversationState) -> Result<(), StoreError> {
        self.states.insert(state.chat_id, state.clone());
        Ok(())
    }

    async fn clear(&self, chat_id: ChatId) -> Result<(), StoreError> {
        self.states.remove(&chat_id);
        Ok(())
    }

    async fn take(&self, chat_id: ChatId) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.states.remove(&chat_id).map(|(_, state)| state))
    }
}

/// Conversation states as JSON text in `conversation_states`
#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get(&self, chat_id: ChatId) -> Result<Option<ConversationState>, StoreError> {
        let row = sqlx::query("SELECT state FROM conversation_states WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_state(chat_id, &row)).transpose()
    }

    async fn put(&self, state: &ConversationState) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state)
            .map_err(|e| StoreError::Corrupt(format!("encode conversation state: {}", e)))?;

        sqlx::query(
            r#"INSERT INTO conversation_states (chat_id, state, updated_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (chat_id) DO UPDATE
               SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at"#,
        )
        .bind(state.chat_id)
        .bind(raw)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, chat_id: ChatId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversation_states WHERE chat_id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take(&self, chat_id: ChatId) -> Result<Option<ConversationState>, StoreError> {
        let row = sqlx::query("DELETE FROM conversation_states WHERE chat_id = $1 RETURNING state")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_state(chat_id, &row)).transpose()
    }
}

fn decode_state(chat_id: ChatId, row: &PgRow) -> Result<ConversationState, StoreError> {
    let raw: String = row.try_get("state")?;
    serde_json::from_str(&raw).map_err(|e| {
        StoreError::Corrupt(format!("conversation state of chat {}: {}", chat_id, e))
    })
}

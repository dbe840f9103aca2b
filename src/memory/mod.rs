//! Conversation memory: the keyed store contract, a windowed in-process
//! store, and conversation id generation.


use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::Message;

pub const DEFAULT_MAX_MESSAGES: usize = 60;

/// Ordered message history keyed by conversation id.
///
/// Implementations keep at most a fixed window of messages per
/// conversation and evict the oldest first.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, conversation_id: &str, message: Message) -> crate::Result<()>;

    /// Messages oldest-first
    async fn read(&self, conversation_id: &str) -> crate::Result<Vec<Message>>;

    async fn clear(&self, conversation_id: &str) -> crate::Result<()>;

    /// Record a question and its answer as one exchange
    async fn append_turn(
        &self,
        conversation_id: &str,
        user: Message,
        assistant: Message,
    ) -> crate::Result<()> {
        self.append(conversation_id, user).await?;
        self.append(conversation_id, assistant).await
    }
}

pub struct InMemoryConversationStore {
    max_messages: usize,
    conversations: RwLock<HashMap<String, VecDeque<Message>>>,
}

impl InMemoryConversationStore {
    #[inline]
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    fn push_bounded(&self, history: &mut VecDeque<Message>, message: Message) {
        history.push_back(message);
        while history.len() > self.max_messages {
            history.pop_front();
        }
    }
}

impl Default for InMemoryConversationStore {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    #[inline]
    async fn append(&self, conversation_id: &str, message: Message) -> crate::Result<()> {
        let mut conversations = self.conversations.write().await;
        let history = conversations
            .entry(conversation_id.to_string())
            .or_default();
        self.push_bounded(history, message);
        Ok(())
    }

    #[inline]
    async fn read(&self, conversation_id: &str) -> crate::Result<Vec<Message>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default())
    }

    #[inline]
    async fn clear(&self, conversation_id: &str) -> crate::Result<()> {
        self.conversations.write().await.remove(conversation_id);
        Ok(())
    }

    #[inline]
    async fn append_turn(
        &self,
        conversation_id: &str,
        user: Message,
        assistant: Message,
    ) -> crate::Result<()> {
        let mut conversations = self.conversations.write().await;
        let history = conversations
            .entry(conversation_id.to_string())
            .or_default();
        self.push_bounded(history, user);
        self.push_bounded(history, assistant);
        Ok(())
    }
}

/// A fresh short conversation id: the first group of a random UUID
#[inline]
pub fn new_conversation_id() -> String {
    format!("{:08x}", Uuid::new_v4().as_fields().0)
}

/// Use the caller's id when it is non-blank, otherwise mint a new one
#[inline]
pub fn resolve_conversation_id(requested: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(new_conversation_id, str::to_string)
}

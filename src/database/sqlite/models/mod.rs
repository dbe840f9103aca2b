#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use crate::DocIntelError;
use crate::model::{Message, Role};

/// Row shape of the `messages` table
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insertable form of a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStoredMessage<'a> {
    pub conversation_id: &'a str,
    pub role: &'static str,
    pub content: &'a str,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewStoredMessage<'a> {
    #[inline]
    pub fn from_message(conversation_id: &'a str, message: &'a Message) -> Result<Self, DocIntelError> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DocIntelError::Database(format!("Failed to encode metadata: {e}")))?;
        Ok(Self {
            conversation_id,
            role: message.role.as_str(),
            content: &message.content,
            metadata,
            created_at: message.created_at,
        })
    }
}

impl TryFrom<StoredMessage> for Message {
    type Error = DocIntelError;

    #[inline]
    fn try_from(row: StoredMessage) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(DocIntelError::Database)?;
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| {
                DocIntelError::Database(format!("Invalid metadata on message {}: {e}", row.id))
            })?;
        Ok(Self {
            role,
            content: row.content,
            metadata,
            created_at: row.created_at,
        })
    }
}

//! Model gateway contract and the value types that flow through it.
//!
//! A gateway turns one [`ModelInvocationRequest`] into one
//! [`ModelInvocationResult`]. Concrete gateways speak a provider's wire
//! format over blocking HTTP; [`retry::RetryingGateway`] wraps any gateway
//! with exponential backoff on transient faults.


pub mod gemini;
mod http;
pub mod openai;
pub mod retry;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind, RetryConfig};
use crate::retrieval::{RetrievedPassage, render_context};

pub use gemini::GeminiGateway;
pub use openai::OpenAiGateway;
pub use retry::{RetryPolicy, RetryingGateway};

/// Errors raised by a model gateway
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// Network failure, rate limit or server error; safe to retry
    #[error("Transient model error: {message}")]
    Transient { message: String },
    /// Bad request, authentication failure or unusable response; never retried
    #[error("Fatal model error: {message}")]
    Fatal { message: String },
    /// Transient faults persisted past the retry cap
    #[error("Upstream unavailable after {attempts} attempts: {last}")]
    UpstreamUnavailable { attempts: u32, last: String },
    #[error("Model invocation cancelled")]
    Cancelled,
}

impl ModelError {
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[inline]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("Unknown message role: {}", other)),
        }
    }
}

/// One turn of a conversation. Immutable once appended to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Token accounting reported by a provider. Any count may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: Option<u32>,
    pub prompt: Option<u32>,
    pub completion: Option<u32>,
}

impl TokenUsage {
    #[inline]
    pub fn summary(&self) -> String {
        format!(
            "Tokens - total: {}, prompt: {}, completion: {}",
            self.total.unwrap_or(0),
            self.prompt.unwrap_or(0),
            self.completion.unwrap_or(0)
        )
    }
}

/// Binary payload sent alongside the prompt (e.g. a PDF for extraction)
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

impl Attachment {
    #[inline]
    pub fn pdf(file_name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: "application/pdf".to_string(),
            data: data.into(),
        }
    }
}

/// Everything a gateway needs for one call.
///
/// Treated as a value: advisors derive new requests with the `with_*`
/// methods instead of editing one in place, so the caller's original stays
/// intact for retries and auditing.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInvocationRequest {
    /// The caller's question, untouched by prompt augmentation
    pub question: String,
    /// Text sent as the user turn
    pub user_text: String,
    pub system_instructions: Option<String>,
    pub prior_messages: Vec<Message>,
    pub context: Arc<[RetrievedPassage]>,
    pub output_schema: Option<Value>,
    pub attachments: Vec<Attachment>,
}

impl ModelInvocationRequest {
    #[inline]
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            user_text: question.clone(),
            question,
            system_instructions: None,
            prior_messages: Vec::new(),
            context: Arc::from(Vec::new()),
            output_schema: None,
            attachments: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_user_text(self, user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..self
        }
    }

    #[inline]
    #[must_use]
    pub fn with_system_instructions(self, system: impl Into<String>) -> Self {
        Self {
            system_instructions: Some(system.into()),
            ..self
        }
    }

    #[inline]
    #[must_use]
    pub fn with_prior_messages(self, prior_messages: Vec<Message>) -> Self {
        Self {
            prior_messages,
            ..self
        }
    }

    #[inline]
    #[must_use]
    pub fn with_context(self, context: impl Into<Arc<[RetrievedPassage]>>) -> Self {
        Self {
            context: context.into(),
            ..self
        }
    }

    #[inline]
    #[must_use]
    pub fn with_output_schema(self, schema: Value) -> Self {
        Self {
            output_schema: Some(schema),
            ..self
        }
    }

    #[inline]
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// A copy of this request whose user turn carries `suffix` on a new line
    #[inline]
    #[must_use]
    pub fn augmented(&self, suffix: &str) -> Self {
        Self {
            user_text: format!("{}\n{}", self.user_text, suffix),
            ..self.clone()
        }
    }

    /// Prior turns worth replaying to a provider; blank messages are skipped
    #[inline]
    pub fn replayable_messages(&self) -> impl Iterator<Item = &Message> {
        self.prior_messages
            .iter()
            .filter(|message| !message.content.trim().is_empty())
    }

    /// The user turn as sent over the wire, with retrieved context appended
    #[inline]
    pub fn render_user_message(&self) -> String {
        if self.context.is_empty() {
            self.user_text.clone()
        } else {
            format!("{}\n\n{}", self.user_text, render_context(&self.context))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInvocationResult {
    pub text: Option<String>,
    /// Parsed JSON payload when the request carried an output schema
    pub structured: Option<Value>,
    pub usage: Option<TokenUsage>,
    /// The model asked for a tool/function call instead of answering
    pub tool_call: bool,
    pub model: Option<String>,
}

impl ModelInvocationResult {
    #[inline]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// A generative model endpoint
#[async_trait]
pub trait ModelGateway: Send + Sync {
    fn model_name(&self) -> &str;

    async fn invoke(
        &self,
        request: &ModelInvocationRequest,
    ) -> Result<ModelInvocationResult, ModelError>;
}

/// Build the gateway described by `provider`, wrapped in transient-fault retry
#[inline]
pub fn create_gateway(
    provider: &ProviderConfig,
    retry: &RetryConfig,
) -> crate::Result<Arc<dyn ModelGateway>> {
    let inner: Arc<dyn ModelGateway> = match provider.provider {
        ProviderKind::Gemini => Arc::new(GeminiGateway::new(provider)?),
        ProviderKind::OpenAi => Arc::new(OpenAiGateway::new(provider)?),
    };
    Ok(Arc::new(RetryingGateway::new(inner, RetryPolicy::from(retry))))
}

/// Parse a JSON payload the model returned as text, tolerating a
/// surrounding markdown code fence
#[inline]
pub fn parse_json_payload(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).ok()
}

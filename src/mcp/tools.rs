//! MCP Tools Implementation
//!
//! The four caller-facing operations of [`DocIntelService`] exposed as tools.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use itertools::Itertools;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::mcp::protocol::{CallToolResult, Tool};
use crate::mcp::server::ToolHandler;
use crate::model::Message;
use crate::service::{Answer, DocIntelService};
use crate::{DocIntelError, Result};

/// Every tool backed by one shared service
#[inline]
pub fn docintel_tools(service: &Arc<DocIntelService>) -> Vec<Box<dyn ToolHandler>> {
    vec![
        Box::new(AskHandler::new(Arc::clone(service))),
        Box::new(HistoryHandler::new(Arc::clone(service))),
        Box::new(ClearConversationHandler::new(Arc::clone(service))),
        Box::new(IngestPdfHandler::new(Arc::clone(service))),
    ]
}

pub struct AskHandler {
    service: Arc<DocIntelService>,
}

impl AskHandler {
    #[inline]
    pub fn new(service: Arc<DocIntelService>) -> Self {
        Self { service }
    }

    /// Create the ask tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "ask".to_string(),
            description: Some(
                "Answer a question from the ingested documents. The answer is checked for \
                 grounding and relevance and regenerated with a corrective prompt up to the \
                 configured attempt limit."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    },
                    "conversation_id": {
                        "type": "string",
                        "description": "Optional: continue an earlier conversation. A new id is returned when omitted"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AskHandler {
    #[inline]
    fn definition(&self) -> Tool {
        Self::tool_definition()
    }

    #[inline]
    async fn handle(
        &self,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<CallToolResult> {
        let question = required_str(&arguments, "question")?;
        let conversation_id = optional_str(&arguments, "conversation_id");
        debug!(
            "ask: conversation_id={:?}, question length={}",
            conversation_id,
            question.len()
        );

        match self.service.answer(question, conversation_id, cancel).await {
            Ok(answer) => {
                let details = format_answer_details(&answer);
                Ok(CallToolResult::text(answer.text).with_text(details))
            }
            Err(e @ DocIntelError::InvalidRequest(_)) => Err(e),
            Err(e) => {
                error!("ask failed: {}", e);
                Ok(CallToolResult::error(format!("Failed to answer: {}", e)))
            }
        }
    }
}

pub struct HistoryHandler {
    service: Arc<DocIntelService>,
}

impl HistoryHandler {
    #[inline]
    pub fn new(service: Arc<DocIntelService>) -> Self {
        Self { service }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "history".to_string(),
            description: Some("Show the messages of a conversation, oldest first".to_string()),
            input_schema: conversation_id_schema(),
        }
    }
}

#[async_trait]
impl ToolHandler for HistoryHandler {
    #[inline]
    fn definition(&self) -> Tool {
        Self::tool_definition()
    }

    #[inline]
    async fn handle(
        &self,
        arguments: Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<CallToolResult> {
        let conversation_id = required_str(&arguments, "conversation_id")?;

        match self.service.history(conversation_id).await {
            Ok(messages) if messages.is_empty() => Ok(CallToolResult::text(format!(
                "No messages in conversation {}",
                conversation_id
            ))),
            Ok(messages) => Ok(CallToolResult::text(format_history(&messages))),
            Err(e) => {
                error!("history failed: {}", e);
                Ok(CallToolResult::error(format!(
                    "Failed to read history: {}",
                    e
                )))
            }
        }
    }
}

pub struct ClearConversationHandler {
    service: Arc<DocIntelService>,
}

impl ClearConversationHandler {
    #[inline]
    pub fn new(service: Arc<DocIntelService>) -> Self {
        Self { service }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "clear_conversation".to_string(),
            description: Some("Forget every message of a conversation".to_string()),
            input_schema: conversation_id_schema(),
        }
    }
}

#[async_trait]
impl ToolHandler for ClearConversationHandler {
    #[inline]
    fn definition(&self) -> Tool {
        Self::tool_definition()
    }

    #[inline]
    async fn handle(
        &self,
        arguments: Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<CallToolResult> {
        let conversation_id = required_str(&arguments, "conversation_id")?;

        match self.service.clear(conversation_id).await {
            Ok(()) => Ok(CallToolResult::text(format!(
                "Cleared conversation {}",
                conversation_id
            ))),
            Err(e) => {
                error!("clear failed: {}", e);
                Ok(CallToolResult::error(format!(
                    "Failed to clear conversation: {}",
                    e
                )))
            }
        }
    }
}

pub struct IngestPdfHandler {
    service: Arc<DocIntelService>,
}

impl IngestPdfHandler {
    #[inline]
    pub fn new(service: Arc<DocIntelService>) -> Self {
        Self { service }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "ingest_pdf".to_string(),
            description: Some(
                "Extract every page of a PDF and index it for question answering. \
                 Re-ingesting a file overwrites the pages it had before."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of a PDF readable by the server"
                    },
                    "content_base64": {
                        "type": "string",
                        "description": "Alternatively: the PDF bytes, base64 encoded"
                    },
                    "file_name": {
                        "type": "string",
                        "description": "Optional: name recorded as the source of each page (defaults to the file name of path)"
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for IngestPdfHandler {
    #[inline]
    fn definition(&self) -> Tool {
        Self::tool_definition()
    }

    #[inline]
    async fn handle(
        &self,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<CallToolResult> {
        let (bytes, file_name) = match (
            optional_str(&arguments, "path"),
            optional_str(&arguments, "content_base64"),
        ) {
            (Some(_), Some(_)) => {
                return Err(DocIntelError::InvalidRequest(
                    "pass either path or content_base64, not both".to_string(),
                ));
            }
            (Some(path), None) => {
                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return Ok(CallToolResult::error(format!(
                            "Failed to read {}: {}",
                            path, e
                        )));
                    }
                };
                let file_name = optional_str(&arguments, "file_name")
                    .or_else(|| Path::new(path).file_name().and_then(|name| name.to_str()))
                    .unwrap_or(path)
                    .to_string();
                (bytes, file_name)
            }
            (None, Some(encoded)) => {
                let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
                    DocIntelError::InvalidRequest(format!("content_base64 is not base64: {}", e))
                })?;
                let file_name = optional_str(&arguments, "file_name")
                    .unwrap_or("document.pdf")
                    .to_string();
                (bytes, file_name)
            }
            (None, None) => {
                return Err(DocIntelError::InvalidRequest(
                    "Missing required parameter: path or content_base64".to_string(),
                ));
            }
        };

        info!("ingest_pdf: {} ({} bytes)", file_name, bytes.len());
        match self.service.ingest(bytes, &file_name, &cancel).await {
            Ok(report) => Ok(CallToolResult::text(format!(
                "Indexed {} page(s) from {}",
                report.record_count, report.file_name
            ))),
            Err(e @ DocIntelError::InvalidRequest(_)) => Err(e),
            Err(e) => {
                error!("ingest_pdf failed: {}", e);
                Ok(CallToolResult::error(format!(
                    "Failed to ingest {}: {}",
                    file_name, e
                )))
            }
        }
    }
}

fn conversation_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "conversation_id": {
                "type": "string",
                "description": "Conversation identifier returned by ask"
            }
        },
        "required": ["conversation_id"],
        "additionalProperties": false
    })
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    optional_str(arguments, key)
        .ok_or_else(|| DocIntelError::InvalidRequest(format!("Missing required parameter: {}", key)))
}

/// A present, non-blank string argument
fn optional_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// Conversation id, evaluation outcome and sources, shown after the answer
#[inline]
pub fn format_answer_details(answer: &Answer) -> String {
    let details = format!(
        "conversation_id: {}\nEvaluation: {}",
        answer.conversation_id, answer.evaluation
    );
    if answer.sources.is_empty() {
        return details;
    }
    let sources = answer
        .sources
        .iter()
        .map(|passage| {
            let page = passage
                .page_number
                .map_or_else(String::new, |page| format!(", page {}", page));
            format!("- {}{} (score {:.2})", passage.source_id, page, passage.score)
        })
        .join("\n");
    format!("{}\nSources:\n{}", details, sources)
}

#[inline]
pub fn format_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            format!(
                "[{}] {}: {}",
                message.created_at.format("%Y-%m-%d %H:%M:%S"),
                message.role,
                message.content
            )
        })
        .join("\n")
}

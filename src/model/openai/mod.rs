//! OpenAI-compatible `chat/completions` gateway.


use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

use super::http::{build_agent, post_json, token_count};
use super::{
    ModelError, ModelGateway, ModelInvocationRequest, ModelInvocationResult, TokenUsage,
    parse_json_payload,
};
use crate::config::ProviderConfig;

/// Structured outputs must have an object at the root
const WRAPPED_FIELD: &str = "items";

pub struct OpenAiGateway {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
}

impl OpenAiGateway {
    #[inline]
    pub fn new(config: &ProviderConfig) -> crate::Result<Self> {
        config.validate()?;
        let api_key = config.api_key()?;
        Ok(Self::with_api_key(config, api_key))
    }

    #[inline]
    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> Self {
        Self {
            agent: build_agent(Duration::from_secs(config.timeout_secs)),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
        }
    }

    fn build_request_body(&self, request: &ModelInvocationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_instructions {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in request.replayable_messages() {
            messages.push(json!({
                "role": message.role.as_str(),
                "content": message.content,
            }));
        }

        let text = request.render_user_message();
        let content = if request.attachments.is_empty() {
            json!(text)
        } else {
            let mut parts = vec![json!({ "type": "text", "text": text })];
            for attachment in &request.attachments {
                parts.push(json!({
                    "type": "file",
                    "file": {
                        "filename": attachment.file_name,
                        "file_data": format!(
                            "data:{};base64,{}",
                            attachment.mime_type,
                            STANDARD.encode(&attachment.data)
                        ),
                    }
                }));
            }
            Value::Array(parts)
        };
        messages.push(json!({ "role": "user", "content": content }));

        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.model));
        body.insert("messages".to_string(), Value::Array(messages));
        if let Some(temperature) = self.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(schema) = &request.output_schema {
            body.insert(
                "response_format".to_string(),
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "structured_output",
                        "strict": false,
                        "schema": wrap_schema(schema),
                    }
                }),
            );
        }
        Value::Object(body)
    }
}

fn is_object_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("object")
}

fn wrap_schema(schema: &Value) -> Value {
    if is_object_schema(schema) {
        schema.clone()
    } else {
        json!({
            "type": "object",
            "properties": { WRAPPED_FIELD: schema },
            "required": [WRAPPED_FIELD],
        })
    }
}

/// Parse a `chat/completions` reply, unwrapping non-object structured output
pub(crate) fn parse_response(
    body: &Value,
    schema: Option<&Value>,
) -> Result<ModelInvocationResult, ModelError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| ModelError::fatal("OpenAI response has no choices"))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let tool_call = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .is_some_and(|calls| !calls.is_empty());

    let usage = body.get("usage").map(|usage| TokenUsage {
        total: token_count(usage, "total_tokens"),
        prompt: token_count(usage, "prompt_tokens"),
        completion: token_count(usage, "completion_tokens"),
    });

    let structured = schema.and_then(|schema| {
        let parsed = parse_json_payload(text.as_deref()?)?;
        if is_object_schema(schema) {
            Some(parsed)
        } else {
            parsed.get(WRAPPED_FIELD).cloned()
        }
    });

    Ok(ModelInvocationResult {
        text,
        structured,
        usage,
        tool_call,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn invoke(
        &self,
        request: &ModelInvocationRequest,
    ) -> Result<ModelInvocationResult, ModelError> {
        let body = self.build_request_body(request);
        debug!(
            "Calling OpenAI-compatible model {} with {} prior messages",
            self.model,
            request.prior_messages.len()
        );
        let response = post_json(
            &self.agent,
            format!("{}/chat/completions", self.base_url),
            vec![("Authorization", format!("Bearer {}", self.api_key))],
            &body,
        )
        .await?;
        let mut result = parse_response(&response, request.output_schema.as_ref())?;
        result.model.get_or_insert_with(|| self.model.clone());
        Ok(result)
    }
}

//! Google Gemini `generateContent` gateway.


use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

use super::http::{build_agent, post_json, token_count};
use super::{
    ModelError, ModelGateway, ModelInvocationRequest, ModelInvocationResult, Role, TokenUsage,
    parse_json_payload,
};
use crate::config::ProviderConfig;

pub struct GeminiGateway {
    agent: ureq::Agent,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
}

impl GeminiGateway {
    /// Build from configuration, reading the API key from the environment
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

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request_body(&self, request: &ModelInvocationRequest) -> Value {
        let mut system_parts = Vec::new();
        if let Some(system) = &request.system_instructions {
            system_parts.push(json!({ "text": system }));
        }

        let mut contents = Vec::new();
        for message in request.replayable_messages() {
            match message.role {
                Role::System => system_parts.push(json!({ "text": message.content })),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": message.content }],
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": message.content }],
                })),
            }
        }

        let mut parts = vec![json!({ "text": request.render_user_message() })];
        for attachment in &request.attachments {
            parts.push(json!({
                "inline_data": {
                    "mime_type": attachment.mime_type,
                    "data": STANDARD.encode(&attachment.data),
                }
            }));
        }
        contents.push(json!({ "role": "user", "parts": parts }));

        let mut body = Map::new();
        body.insert("contents".to_string(), Value::Array(contents));
        if !system_parts.is_empty() {
            body.insert(
                "system_instruction".to_string(),
                json!({ "parts": system_parts }),
            );
        }

        let mut generation_config = Map::new();
        if let Some(temperature) = self.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(schema) = &request.output_schema {
            generation_config.insert("responseMimeType".to_string(), json!("application/json"));
            generation_config.insert("responseSchema".to_string(), to_gemini_schema(schema));
        }
        if !generation_config.is_empty() {
            body.insert(
                "generationConfig".to_string(),
                Value::Object(generation_config),
            );
        }

        Value::Object(body)
    }
}

/// Parse a `generateContent` reply
pub(crate) fn parse_response(
    body: &Value,
    expects_json: bool,
) -> Result<ModelInvocationResult, ModelError> {
    let candidate = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| {
            let reason = body
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            ModelError::fatal(format!("Gemini returned no answer: {}", reason))
        })?;

    let mut text = String::new();
    let mut tool_call = false;
    if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
        for part in parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                text.push_str(t);
            }
            if part.get("functionCall").is_some() {
                tool_call = true;
            }
        }
    }

    let usage = body.get("usageMetadata").map(|meta| TokenUsage {
        total: token_count(meta, "totalTokenCount"),
        prompt: token_count(meta, "promptTokenCount"),
        completion: token_count(meta, "candidatesTokenCount"),
    });

    let structured = if expects_json {
        parse_json_payload(&text)
    } else {
        None
    };

    Ok(ModelInvocationResult {
        text: (!text.is_empty()).then_some(text),
        structured,
        usage,
        tool_call,
        model: body
            .get("modelVersion")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Gemini expects OpenAPI-style upper-case type names and `nullable` flags
pub(crate) fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let converted = match (key.as_str(), value) {
                        ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                        _ => to_gemini_schema(value),
                    };
                    (key.clone(), converted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
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
            "Calling Gemini model {} with {} prior messages",
            self.model,
            request.prior_messages.len()
        );
        let response = post_json(
            &self.agent,
            self.endpoint(),
            vec![("x-goog-api-key", self.api_key.clone())],
            &body,
        )
        .await?;
        let mut result = parse_response(&response, request.output_schema.is_some())?;
        result.model.get_or_insert_with(|| self.model.clone());
        Ok(result)
    }
}

use serde_json::Value;
use std::time::Duration;

use super::ModelError;

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// POST a JSON body and parse the JSON reply.
///
/// Runs the blocking request on the blocking pool. Rate limiting, server
/// errors and transport failures come back as [`ModelError::Transient`];
/// everything else is fatal.
pub(crate) async fn post_json(
    agent: &ureq::Agent,
    url: String,
    headers: Vec<(&'static str, String)>,
    body: &Value,
) -> Result<Value, ModelError> {
    let agent = agent.clone();
    let payload = serde_json::to_string(body)
        .map_err(|e| ModelError::fatal(format!("Failed to serialize request: {}", e)))?;

    let response = tokio::task::spawn_blocking(move || {
        let mut request = agent.post(&url).header("Content-Type", "application/json");
        for (name, value) in &headers {
            request = request.header(*name, value.as_str());
        }
        request
            .send(&payload)
            .and_then(|mut response| response.body_mut().read_to_string())
    })
    .await
    .map_err(|e| ModelError::fatal(format!("Request task failed: {}", e)))?
    .map_err(classify)?;

    serde_json::from_str(&response)
        .map_err(|e| ModelError::fatal(format!("Failed to parse response: {}", e)))
}

fn classify(error: ureq::Error) -> ModelError {
    match error {
        ureq::Error::StatusCode(429) => ModelError::transient("Rate limited (HTTP 429)"),
        ureq::Error::StatusCode(status) if status >= 500 => {
            ModelError::transient(format!("Server error (HTTP {})", status))
        }
        ureq::Error::StatusCode(status) => {
            ModelError::fatal(format!("Request rejected (HTTP {})", status))
        }
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => {
            ModelError::transient(format!("Connection failed: {}", error))
        }
        ureq::Error::Timeout(_) => ModelError::transient("Request timed out"),
        ureq::Error::Io(e) => ModelError::transient(format!("IO error: {}", e)),
        other => ModelError::fatal(format!("HTTP error: {}", other)),
    }
}

/// Read an optional token count that providers send as a JSON number
pub(crate) fn token_count(value: &Value, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

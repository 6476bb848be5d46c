use super::Generator;
use crate::config::GeneratorConfig;
use crate::context::PromptContext;
use async_trait::async_trait;
use folio_core::{FolioError, FolioResult};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Messages-style JSON API back-end (`POST {endpoint}/v1/messages`).
pub struct MessagesBackend {
    config: GeneratorConfig,
    api_key: String,
    http: reqwest::Client,
}

impl MessagesBackend {
    pub fn new(config: GeneratorConfig) -> FolioResult<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            FolioError::Config(format!(
                "generator api_key is empty and {} is not set",
                crate::config::API_KEY_ENV
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FolioError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            api_key,
            http,
        })
    }
}

#[async_trait]
impl Generator for MessagesBackend {
    fn name(&self) -> &str {
        &self.config.model_id
    }

    async fn generate(&self, ctx: &PromptContext) -> FolioResult<Value> {
        let url = format!("{}/v1/messages", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": ctx.system_prompt(),
            "messages": [{"role": "user", "content": ctx.render_prompt()}],
        });

        debug!(task_id = %ctx.task_id, attempt = ctx.attempt, %url, "Sending generation request");

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transient(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transient(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            warn!(task_id = %ctx.task_id, %status, "Generation API returned an error");
            return Err(transient(format!("messages API error {status}: {text}")));
        }

        let resp_body: Value = serde_json::from_str(&text)
            .map_err(|e| transient(format!("malformed API response: {e}")))?;
        parse_messages_response(&resp_body, self.config.max_tokens)
    }
}

fn transient(msg: String) -> FolioError {
    FolioError::TransientGeneration(msg)
}

/// Turn an API response body into the task's structured output.
pub fn parse_messages_response(body: &Value, max_tokens: u32) -> FolioResult<Value> {
    if body["stop_reason"].as_str() == Some("max_tokens") {
        return Err(transient(format!(
            "response truncated at {max_tokens} tokens"
        )));
    }

    let content = body["content"]
        .as_array()
        .ok_or_else(|| transient("missing content in API response".into()))?;
    let text: Vec<&str> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect();
    if text.is_empty() {
        return Err(transient("API response has no text block".into()));
    }

    let joined = text.join("\n");
    serde_json::from_str(extract_json(&joined))
        .map_err(|e| transient(format!("response is not valid JSON: {e}")))
}

/// Strip markdown fences and surrounding prose from a JSON reply.
pub fn extract_json(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    let s = s.trim();

    let start = match (s.find('{'), s.find('[')) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return s,
    };
    let closing = if s[start..].starts_with('{') { '}' } else { ']' };
    match s.rfind(closing) {
        Some(end) if end > start => &s[start..=end],
        _ => &s[start..],
    }
}

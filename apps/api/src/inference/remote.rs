//! Remote generation backend speaking the Anthropic Messages API shape.
//!
//! No retries here: a failed generation call surfaces as `EngineError::Inference` and
//! the caller decides whether to try again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EngineError;
use crate::inference::model::GenerationModel;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

pub struct MessagesApiGenerator {
    model_id: String,
    client: Client,
    api_key: String,
    config: MessagesApiConfig,
}

impl MessagesApiGenerator {
    pub fn new(model_id: &str, config: MessagesApiConfig, api_key: String) -> Result<Self, String> {
        if api_key.is_empty() {
            return Err("no generation API key configured".to_string());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            model_id: model_id.to_string(),
            client,
            api_key,
            config,
        })
    }

    fn fail(&self, reason: impl ToString) -> EngineError {
        EngineError::inference(&self.model_id, reason)
    }
}

#[async_trait]
impl GenerationModel for MessagesApiGenerator {
    async fn generate(&self, prompt: &str, system: &str) -> Result<String, EngineError> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.fail(format!("HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            return Err(self.fail(format!("API error (status {}): {message}", status.as_u16())));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| self.fail(format!("malformed response: {e}")))?;

        debug!(
            model_id = %self.model_id,
            "generation succeeded: input_tokens={}, output_tokens={}",
            parsed.usage.input_tokens, parsed.usage.output_tokens
        );

        parsed
            .text()
            .map(|t| t.trim().to_string())
            .ok_or_else(|| self.fail("model returned empty content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: MessagesApiConfig =
            serde_json::from_str(r#"{"model":"claude-sonnet-4-5"}"#).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_tokens, 1024);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let config: MessagesApiConfig = serde_json::from_str(r#"{"model":"m"}"#).unwrap();
        assert!(MessagesApiGenerator::new("coach", config, String::new()).is_err());
    }

    #[test]
    fn test_response_text_picks_first_text_block() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"tool_use"},{"type":"text","text":"hello"}],
                "usage":{"input_tokens":1,"output_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(parsed.text(), Some("hello"));
    }
}

//! Reasoning service client.
//!
//! Each extraction stage is one call to the Anthropic Messages API with a
//! single tool whose input schema is the stage schema, and `tool_choice`
//! forcing the model to answer through that tool. The stage result is the
//! tool call's `input` object.

use crate::error::{BifError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Default API endpoint (without the `/messages` suffix)
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Default model used for all three stages
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Long prompts with 16k-token answers take a while
const REQUEST_TIMEOUT_SECS: u64 = 180;

/// One structured-output call.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub system: &'static str,
    pub user: String,
    pub tool_name: &'static str,
    pub tool_description: &'static str,
    pub schema: Value,
    pub max_tokens: u32,
}

/// Something that answers a stage request with a JSON object.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn call_tool(&self, request: &StageRequest) -> Result<Value>;
}

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }
}

/// Token usage tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Default)]
struct AtomicTokenUsage {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl AtomicTokenUsage {
    fn add(&self, usage: &ApiUsage) {
        self.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
    }

    fn get(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Messages API response structures
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Anthropic Messages API client
pub struct AnthropicClient {
    client: reqwest::Client,
    config: LlmConfig,
    usage: AtomicTokenUsage,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BifError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            usage: AtomicTokenUsage::default(),
        })
    }

    /// Tokens consumed so far by this client
    pub fn usage(&self) -> TokenUsage {
        self.usage.get()
    }

    fn request_body(&self, request: &StageRequest) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": self.config.temperature,
            "system": request.system,
            "messages": [
                {"role": "user", "content": request.user}
            ],
            "tools": [{
                "name": request.tool_name,
                "description": request.tool_description,
                "input_schema": request.schema,
            }],
            "tool_choice": {"type": "tool", "name": request.tool_name}
        })
    }
}

#[async_trait]
impl ReasoningService for AnthropicClient {
    async fn call_tool(&self, request: &StageRequest) -> Result<Value> {
        let api_url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));

        debug!(tool = request.tool_name, prompt_chars = request.user.len(), "Sending LLM request");

        let response = self
            .client
            .post(&api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BifError::Api {
                code: status.as_u16(),
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let api_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BifError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(usage) = &api_response.usage {
            self.usage.add(usage);
        }

        let input = tool_input(api_response.content, request.tool_name)?;
        info!(tool = request.tool_name, "LLM stage answered");
        Ok(input)
    }
}

/// Pick the `input` of the first tool call with the expected name.
fn tool_input(content: Vec<ContentBlock>, tool_name: &str) -> Result<Value> {
    content
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == tool_name => Some(input),
            _ => None,
        })
        .ok_or_else(|| BifError::Parse(format!("response has no {} tool call", tool_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AnthropicClient {
        let config = LlmConfig {
            base_url: server.uri(),
            ..LlmConfig::new("test-key")
        };
        AnthropicClient::new(config).unwrap()
    }

    fn request() -> StageRequest {
        StageRequest {
            system: "system",
            user: "user".to_string(),
            tool_name: "RegionExtraction",
            tool_description: "Extract brain regions from text",
            schema: json!({"type": "object"}),
            max_tokens: 8000,
        }
    }

    #[tokio::test]
    async fn test_call_tool_returns_tool_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({
                "max_tokens": 8000,
                "tool_choice": {"type": "tool", "name": "RegionExtraction"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "thinking"},
                    {"type": "tool_use", "id": "t1", "name": "RegionExtraction",
                     "input": {"regions": [{"canonical_name": "M1"}]}}
                ],
                "usage": {"input_tokens": 120, "output_tokens": 30}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let llm = client(&server);
        let value = llm.call_tool(&request()).await.unwrap();

        assert_eq!(value["regions"][0]["canonical_name"], "M1");
        assert_eq!(
            llm.usage(),
            TokenUsage {
                input_tokens: 120,
                output_tokens: 30
            }
        );
    }

    #[tokio::test]
    async fn test_missing_tool_call_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "no tool"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server).call_tool(&request()).await.unwrap_err();
        assert!(matches!(err, BifError::Parse(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client(&server).call_tool(&request()).await.unwrap_err();
        match err {
            BifError::Api { code, message } => {
                assert_eq!(code, 401);
                assert!(message.contains("bad key"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

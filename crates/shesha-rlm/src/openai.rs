//! OpenAI-compatible chat-completions client.
//!
//! Works against any provider exposing the `/v1/chat/completions` shape
//! (OpenAI, Groq, Ollama, vLLM, …). Transient network failures are retried
//! with exponential backoff; provider-reported errors are not.

use std::time::Duration;

use reqwest::{Client, header};
use serde::{Deserialize, Serialize};

use crate::client::{Completion, LlmClient, with_retry};
use crate::error::{Result, RlmError};
use crate::types::{ChatMessage, ChatRole};

/// Default API base URL.
const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Configuration for the OpenAI-compatible client.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication; empty disables the auth header
    /// (local providers).
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,

    /// Sampling temperature, if set.
    pub temperature: Option<f32>,

    /// Completion token cap per call.
    pub max_tokens: Option<u32>,
}

impl OpenAiConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            temperature: Some(0.1),
            max_tokens: None,
        }
    }

    /// Create config from `SHESHA_API_KEY` or `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SHESHA_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                RlmError::Config(
                    "neither SHESHA_API_KEY nor OPENAI_API_KEY is set".to_string(),
                )
            })?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap completion tokens per call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// OpenAI-compatible API client.
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RlmError::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create a client from environment configuration.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.base_url)
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");
        if self.config.api_key.is_empty() {
            builder
        } else {
            builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
        }
    }

    fn to_wire_request(&self, messages: &[ChatMessage], model: &str) -> WireChatRequest {
        WireChatRequest {
            model: model.to_string(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    }
                    .to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        }
    }

    async fn complete_once(&self, messages: &[ChatMessage], model: &str) -> Result<Completion> {
        let request = self.to_wire_request(messages, model);
        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RlmError::Llm(format!(
                "provider returned {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let parsed: WireChatResponse = response
            .json()
            .await
            .map_err(|e| RlmError::Llm(format!("invalid provider response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();

        Ok(Completion {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage], model: &str) -> Result<Completion> {
        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "openai",
            || self.complete_once(messages, model),
        )
        .await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// Wire format structs for the chat completions endpoint.

#[derive(Debug, Serialize)]
struct WireChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    // Optional on the way back: some providers omit content entirely.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_builder() {
        let config = OpenAiConfig::new("key")
            .with_base_url("http://localhost:11434")
            .with_max_retries(1)
            .with_temperature(0.0)
            .with_max_tokens(2048);
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_tokens, Some(2048));
    }

    #[test]
    #[serial]
    fn test_from_env_missing() {
        // Both variables absent: construction must fail with a config error.
        unsafe {
            std::env::remove_var("SHESHA_API_KEY");
            std::env::remove_var("OPENAI_API_KEY");
        }
        assert!(matches!(OpenAiConfig::from_env(), Err(RlmError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_prefers_shesha_key() {
        unsafe {
            std::env::set_var("SHESHA_API_KEY", "shesha-key");
            std::env::set_var("OPENAI_API_KEY", "openai-key");
        }
        let config = OpenAiConfig::from_env().unwrap();
        assert_eq!(config.api_key, "shesha-key");
        unsafe {
            std::env::remove_var("SHESHA_API_KEY");
            std::env::remove_var("OPENAI_API_KEY");
        }
    }

    #[test]
    fn test_wire_request_shape() {
        let client = OpenAiClient::new(OpenAiConfig::new("k")).unwrap();
        let request = client.to_wire_request(
            &[
                ChatMessage::system("sys"),
                ChatMessage::user("question"),
                ChatMessage::assistant("reply"),
            ],
            "test-model",
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][2]["role"], "assistant");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: WireChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_response_parsing_without_usage() {
        let body = r#"{"choices": [{"message": {"role": "assistant"}}]}"#;
        let parsed: WireChatResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());
        assert!(parsed.choices[0].message.content.is_none());
    }
}

//! Chat-completion client for the synthesis stages.
//!
//! The stages only need one operation: send a system+user conversation to a
//! model and get text back. [`ChatClient`] implements that against any
//! `/chat/completions` endpoint (OpenRouter, LiteLLM proxies, self-hosted
//! gateways); the request and response types double as the wire format.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A completion request. Serializes to the wire format as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier; an empty string defers to the client's default.
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature; omitted from the wire when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completion response, deserialized from the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    /// Token accounting; some gateways omit it.
    #[serde(default)]
    pub usage: Usage,
}

impl GenerationResponse {
    /// Text of the first choice, when the model returned one.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Anything that can complete a conversation. Stages depend on this trait,
/// never on [`ChatClient`] directly, so tests can script the responses.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Production [`LlmProvider`] over an OpenAI-compatible HTTP endpoint.
pub struct ChatClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(api_base: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            api_base,
            api_key,
            default_model,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Reads `SCRIPTSMITH_API_BASE` (required), `SCRIPTSMITH_API_KEY`
    /// (optional) and `SCRIPTSMITH_DEFAULT_MODEL`.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("SCRIPTSMITH_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("SCRIPTSMITH_API_KEY").ok();
        let default_model = env::var("SCRIPTSMITH_DEFAULT_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-sonnet-4".to_string());

        Ok(Self::new(api_base, api_key, default_model))
    }
}

/// Maps a non-success HTTP response to an [`LlmError`], pulling the message
/// out of an OpenAI-style `{"error": {...}}` body when one is present.
fn api_error(code: u16, body: &str) -> LlmError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string());

    if code == 429 {
        LlmError::RateLimited(message)
    } else {
        LlmError::ApiError { code, message }
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(
        &self,
        mut request: GenerationRequest,
    ) -> Result<GenerationResponse, LlmError> {
        if request.model.is_empty() {
            request.model = self.default_model.clone();
        }
        let model = request.model.clone();

        let mut call = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: GenerationResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        if parsed.choices.is_empty() {
            return Err(LlmError::EmptyCompletion(model));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("a").role, "system");
        assert_eq!(Message::user("b").role, "user");
        assert_eq!(Message::assistant("c").role, "assistant");
    }

    #[test]
    fn test_request_wire_format() {
        let request = GenerationRequest::new("m", vec![Message::user("hi")]);
        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("\"model\":\"m\""));
        assert!(!json.contains("temperature"));

        let warm = request.with_temperature(0.3);
        let json = serde_json::to_string(&warm).expect("serialize");
        assert!(json.contains("\"temperature\":0.3"));
    }

    #[test]
    fn test_response_parsing_tolerates_missing_usage() {
        let body = r#"{
            "id": "gen-1", "object": "chat.completion", "model": "m",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}]
        }"#;
        let parsed: GenerationResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.first_content(), Some("hello"));
        assert_eq!(parsed.usage.total_tokens, 0);
    }

    #[test]
    fn test_api_error_mapping() {
        let err = api_error(429, r#"{"error": {"message": "slow down"}}"#);
        assert!(matches!(err, LlmError::RateLimited(m) if m == "slow down"));

        let err = api_error(503, "upstream unavailable");
        assert!(matches!(
            err,
            LlmError::ApiError { code: 503, message } if message == "upstream unavailable"
        ));
    }
}

//! Inference client for OpenAI-compatible chat-completions APIs.
//!
//! The client speaks role-tagged message lists and optionally pins the
//! response to a JSON schema. Rate limits, timeouts and schema mismatches
//! map onto distinct `LlmError` variants so call sites can apply the right
//! recovery.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::json::extract_json;
use crate::error::LlmError;

/// Default per-request HTTP timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A message in a conversation with the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the sender ("system", "user", "assistant").
    pub role: String,
    /// Message content.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for one chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier; empty means the client default.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// JSON schema the response object must satisfy, if any.
    #[serde(skip)]
    pub response_schema: Option<serde_json::Value>,
}

impl ChatRequest {
    /// Create a new request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_schema: None,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Pin the response to a JSON schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Token usage counters for one completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Response identifier from the service.
    pub id: String,
    /// Model that produced the response.
    pub model: String,
    /// Generated text of the first choice.
    pub content: String,
    /// Token usage counters.
    pub usage: Usage,
}

/// Trait for inference capabilities. The orchestrator, pipeline, guardrail
/// and holistic evaluator all take this as an injected handle, which is how
/// tests substitute scripted clients.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one chat completion.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Parses the content of a completion into `T`, honoring the schema
/// contract: content that is not valid `T` is a `SchemaMismatch`.
pub fn parse_structured<T: DeserializeOwned>(response: &ChatResponse) -> Result<T, LlmError> {
    let json = extract_json(&response.content)
        .ok_or_else(|| LlmError::SchemaMismatch("no JSON object in response".to_string()))?;
    serde_json::from_str(&json).map_err(|e| LlmError::SchemaMismatch(e.to_string()))
}

/// Client for OpenAI-compatible chat-completions endpoints.
pub struct HttpInferenceClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
    timeout: Duration,
}

impl HttpInferenceClient {
    /// Create a client with explicit configuration.
    pub fn new(api_base: String, api_key: Option<String>, default_model: String) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Self {
            api_base,
            api_key,
            default_model,
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            timeout,
        }
    }

    /// Create a client from environment variables.
    ///
    /// Reads:
    /// - `CONVGRADE_API_BASE`: base URL (required)
    /// - `CONVGRADE_API_KEY`: bearer token (optional)
    /// - `CONVGRADE_MODEL`: default model (optional)
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("CONVGRADE_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("CONVGRADE_API_KEY").ok();
        let default_model =
            env::var("CONVGRADE_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        Ok(Self::new(api_base, api_key, default_model))
    }

    /// The API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// The default model.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

/// Wire request for the chat-completions endpoint.
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let response_format = request.response_schema.as_ref().map(|schema| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema }
            })
        });

        let api_request = ApiRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request.json(&api_request).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        Ok(ChatResponse {
            id: api_response.id,
            model: api_response.model,
            content,
            usage: api_response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are a grader.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content, "You are a grader.");

        let user = Message::user("Hello");
        assert_eq!(user.role, "user");

        let assistant = Message::assistant("Hi there");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new("gemini-2.0-flash", vec![Message::user("hi")])
            .with_temperature(0.3)
            .with_max_tokens(500)
            .with_schema(serde_json::json!({"type": "object"}));

        assert_eq!(request.model, "gemini-2.0-flash");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(500));
        assert!(request.response_schema.is_some());
    }

    #[test]
    fn test_api_request_serialization_skips_none() {
        let messages = vec![Message::user("test")];
        let request = ApiRequest {
            model: "m",
            messages: &messages,
            temperature: Some(0.5),
            max_tokens: None,
            response_format: None,
        };
        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("\"temperature\":0.5"));
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("response_format"));
    }

    #[test]
    fn test_parse_structured_accepts_fenced_json() {
        #[derive(Deserialize)]
        struct Verdict {
            score: f64,
        }

        let response = ChatResponse {
            id: "r1".into(),
            model: "m".into(),
            content: "Here you go:\n```json\n{\"score\": 88.5}\n```".into(),
            usage: Usage::default(),
        };
        let verdict: Verdict = parse_structured(&response).expect("parse");
        assert_eq!(verdict.score, 88.5);
    }

    #[test]
    fn test_parse_structured_schema_mismatch() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Verdict {
            score: f64,
        }

        let response = ChatResponse {
            id: "r1".into(),
            model: "m".into(),
            content: "no json here at all".into(),
            usage: Usage::default(),
        };
        let result: Result<Verdict, _> = parse_structured(&response);
        assert!(matches!(result, Err(LlmError::SchemaMismatch(_))));
    }

    #[tokio::test]
    async fn test_connection_error_maps_to_request_failed() {
        let client = HttpInferenceClient::new(
            "http://localhost:65535".to_string(),
            None,
            "test-model".to_string(),
        );
        let request = ChatRequest::new("", vec![Message::user("hi")]);
        let result = client.complete(request).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}

//! Text completion against an OpenAI-compatible chat endpoint.
//!
//! The client is request/response only: it holds immutable configuration and a
//! pooled `reqwest::Client`, so one instance can be shared behind an `Arc` by
//! every concurrent caller. Retries belong to the caller.

use crate::config::CompletionConfig;
use crate::error::CompletionError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Per-call generation options. Unset fields fall back to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// The response is cut at the first occurrence of any of these strings.
    pub stop: Vec<String>,
}

impl CompletionOptions {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }
}

/// Something that turns a prompt into text.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Issue one completion request and return the raw text.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Truncate `text` at stop strings, in the order given.
pub fn apply_stop(text: &str, stop: &[String]) -> String {
    let mut out = text;
    for s in stop {
        if !s.is_empty()
            && let Some(idx) = out.find(s.as_str())
        {
            out = &out[..idx];
        }
    }
    out.to_string()
}

/// OpenAI-compatible completion client (vLLM, Ollama, LM Studio, OpenAI).
pub struct OpenAiCompatCompleter {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
    timeout_secs: u64,
}

impl OpenAiCompatCompleter {
    /// Create a client from configuration.
    ///
    /// When `api_key_env` names a variable that is not set, construction fails
    /// unless the endpoint is on localhost.
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let is_local =
            config.endpoint.contains("localhost") || config.endpoint.contains("127.0.0.1");

        let api_key = match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) => Some(key),
                Err(_) if is_local => {
                    debug!(env_var = %var, "API key not set for local endpoint; sending none");
                    None
                }
                Err(_) => {
                    return Err(CompletionError::AuthFailed {
                        endpoint: format!("{} (env var '{}' not set)", config.endpoint, var),
                    });
                }
            },
            None => None,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompletionError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.default_max_tokens(),
            temperature: config.temperature,
            top_p: config.top_p,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Build the chat payload for a single user turn.
    fn build_payload(&self, prompt: &str, options: &CompletionOptions) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
            "temperature": options.temperature.unwrap_or(self.temperature),
            "top_p": options.top_p.unwrap_or(self.top_p),
            "n": 1,
        })
    }

    /// Extract `choices[0].message.content` from a response body.
    fn parse_response(body: &Value) -> Result<String, CompletionError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| CompletionError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| CompletionError::ResponseParse {
                message: "No message content in choice".to_string(),
            })
    }

    /// Map an HTTP status code to the appropriate error.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> CompletionError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                CompletionError::AuthFailed {
                    endpoint: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                let retry_after_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                CompletionError::RateLimited { retry_after_secs }
            }
            status if status >= 500 => CompletionError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => CompletionError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if err.is_connect() {
            CompletionError::Connection {
                message: err.to_string(),
            }
        } else {
            CompletionError::ApiRequest {
                message: format!("Request failed: {}", err),
            }
        }
    }
}

#[async_trait]
impl Completer for OpenAiCompatCompleter {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let body = self.build_payload(prompt, options);
        debug!(endpoint = %self.endpoint, model = %self.model, "Sending completion request");

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| CompletionError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        let text = Self::parse_response(&json)?;
        Ok(apply_stop(&text, &options.stop))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A scripted reply for [`MockCompleter`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

/// Completer that replays queued replies, for tests and dry runs.
pub struct MockCompleter {
    replies: std::sync::Mutex<VecDeque<MockReply>>,
    prompts: std::sync::Mutex<Vec<String>>,
    fallback: String,
}

impl MockCompleter {
    pub fn new() -> Self {
        Self {
            replies: std::sync::Mutex::new(VecDeque::new()),
            prompts: std::sync::Mutex::new(Vec::new()),
            fallback: "I'm a mock completer. No queued replies available.".to_string(),
        }
    }

    /// A completer that answers every prompt with the same text.
    pub fn with_fallback(text: impl Into<String>) -> Self {
        Self {
            fallback: text.into(),
            ..Self::new()
        }
    }

    pub fn queue(&self, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockCompleter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(MockReply::Text(text)) => Ok(apply_stop(&text, &options.stop)),
            Some(MockReply::Fail(message)) => Err(CompletionError::Connection { message }),
            None => Ok(apply_stop(&self.fallback, &options.stop)),
        }
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CompletionConfig {
        CompletionConfig {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "Qwen/Qwen2.5-7B-Instruct".to_string(),
            ..CompletionConfig::default()
        }
    }

    #[test]
    fn test_apply_stop_truncates_at_first_occurrence() {
        let stop = vec!["END".to_string()];
        assert_eq!(apply_stop("1. A\n2. B\nEND\n3. C END", &stop), "1. A\n2. B\n");
    }

    #[test]
    fn test_apply_stop_multiple_and_empty() {
        let stop = vec![String::new(), "###".to_string(), "\n\n".to_string()];
        assert_eq!(apply_stop("a\n\nb###c", &stop), "a");
        assert_eq!(apply_stop("no stops here", &[]), "no stops here");
    }

    #[test]
    fn test_build_payload_defaults() {
        let completer = OpenAiCompatCompleter::new(&test_config()).unwrap();
        let payload = completer.build_payload("rank these", &CompletionOptions::default());
        assert_eq!(payload["model"], "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "rank these");
        assert_eq!(payload["max_tokens"], 65_536);
        assert_eq!(payload["temperature"], 0.0);
        assert_eq!(payload["top_p"], 1.0);
        assert_eq!(payload["n"], 1);
    }

    #[test]
    fn test_build_payload_overrides() {
        let completer = OpenAiCompatCompleter::new(&test_config()).unwrap();
        let options = CompletionOptions::default()
            .with_max_tokens(128)
            .with_temperature(0.5);
        let payload = completer.build_payload("p", &options);
        assert_eq!(payload["max_tokens"], 128);
        assert_eq!(payload["temperature"], 0.5);
    }

    #[test]
    fn test_parse_response_text() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  1. A\n2. B \n" } }]
        });
        assert_eq!(
            OpenAiCompatCompleter::parse_response(&body).unwrap(),
            "1. A\n2. B"
        );
    }

    #[test]
    fn test_parse_response_no_choices() {
        let body = json!({ "choices": [] });
        assert!(matches!(
            OpenAiCompatCompleter::parse_response(&body),
            Err(CompletionError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            OpenAiCompatCompleter::map_http_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            CompletionError::AuthFailed { .. }
        ));
        match OpenAiCompatCompleter::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached, try again in 7s"}}"#,
        ) {
            CompletionError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 7),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
        match OpenAiCompatCompleter::map_http_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "boom",
        ) {
            CompletionError::ApiRequest { message } => assert!(message.contains("500")),
            other => panic!("Expected ApiRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_endpoint_requires_key() {
        let config = CompletionConfig {
            endpoint: "https://api.example.com/v1/chat/completions".to_string(),
            api_key_env: Some("RAGREC_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..CompletionConfig::default()
        };
        assert!(matches!(
            OpenAiCompatCompleter::new(&config),
            Err(CompletionError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_local_endpoint_without_key() {
        let config = CompletionConfig {
            api_key_env: Some("RAGREC_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..test_config()
        };
        let completer = OpenAiCompatCompleter::new(&config).unwrap();
        assert!(completer.api_key.is_none());
        assert_eq!(completer.model_name(), "Qwen/Qwen2.5-7B-Instruct");
    }

    #[tokio::test]
    async fn test_mock_completer_replays_in_order() {
        let mock = MockCompleter::with_fallback("fallback");
        mock.queue(MockReply::Text("first STOP tail".into()));
        mock.queue(MockReply::Fail("down".into()));

        let opts = CompletionOptions::default().with_stop(["STOP"]);
        assert_eq!(mock.complete("a", &opts).await.unwrap(), "first ");
        assert!(mock.complete("b", &opts).await.is_err());
        assert_eq!(mock.complete("c", &opts).await.unwrap(), "fallback");
        assert_eq!(mock.prompts(), vec!["a", "b", "c"]);
    }
}

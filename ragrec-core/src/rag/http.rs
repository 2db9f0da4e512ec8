//! Adapter for a RAG server exposing a LightRAG-style REST API.
//!
//! - `POST {base}/documents/text` with `{text, file_source, split_by_character, split_by_character_only}`
//! - `POST {base}/query` with `{query, mode, enable_rerank}` returning `{response}`

use super::{Document, QueryMode, RagEngine, SplitDirective};
use crate::config::RagConfig;
use crate::error::RagError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// RAG engine reached over HTTP.
pub struct HttpRagEngine {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRagEngine {
    pub fn new(config: &RagConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Transport {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        let api_key = config
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn ingest_payload(document: &Document, split: &SplitDirective) -> Value {
        json!({
            "text": document.content,
            "file_source": document.path.display().to_string(),
            "split_by_character": split.separator,
            "split_by_character_only": split.separator_only,
        })
    }

    fn query_payload(prompt: &str, mode: QueryMode) -> Value {
        json!({
            "query": prompt,
            "mode": mode.as_str(),
            "enable_rerank": false,
        })
    }

    fn parse_query_response(body: &Value) -> Result<String, RagError> {
        body.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::ResponseParse {
                message: "No 'response' field in query result".to_string(),
            })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, RagError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| RagError::Transport {
            message: format!("{}: {}", url, e),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| RagError::Transport {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(RagError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| RagError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })
    }
}

#[async_trait]
impl RagEngine for HttpRagEngine {
    async fn ingest(&self, document: &Document, split: &SplitDirective) -> Result<(), RagError> {
        let body = Self::ingest_payload(document, split);
        let reply = self.post("/documents/text", &body).await?;
        if reply.get("status").and_then(|s| s.as_str()) == Some("failure") {
            return Err(RagError::Rejected {
                reason: reply
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("engine reported failure")
                    .to_string(),
            });
        }
        debug!(path = %document.path.display(), "Document accepted by RAG server");
        Ok(())
    }

    async fn query(&self, prompt: &str, mode: QueryMode) -> Result<String, RagError> {
        let reply = self
            .post("/query", &Self::query_payload(prompt, mode))
            .await?;
        Self::parse_query_response(&reply)
    }

    fn name(&self) -> &str {
        "http"
    }
}

//! Embedding providers.
//!
//! [`Embedder`] is the synchronous, possibly CPU-heavy interface of a local
//! model. [`EmbeddingClient`] is what the rest of the crate awaits; a sync
//! embedder reaches it through [`OffloadedEmbedder`], a remote endpoint through
//! [`OpenAiEmbeddingClient`]. Either way the handle is built once at startup and
//! shared read-only.

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::EmbeddingError;
use crate::offload::BlockingPool;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Synchronous embedding model.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>>;

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Async embedding interface used by the RAG engines.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimensions(&self) -> usize;
}

/// Local term-frequency hashing embedder, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            vector[djb2(term) % self.dimensions] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

impl Embedder for HashingEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }
}

/// Bridges a synchronous [`Embedder`] onto the async runtime.
pub struct OffloadedEmbedder {
    inner: Arc<dyn Embedder>,
    pool: BlockingPool,
}

impl OffloadedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, pool: BlockingPool) -> Self {
        Self { inner, pool }
    }
}

#[async_trait]
impl EmbeddingClient for OffloadedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let inner = self.inner.clone();
        let expected = texts.len();
        let vectors = self.pool.run(move || inner.embed_batch(&texts)).await?;
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            dimensions,
        }
    }

    fn parse_response(body: &Value, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let data = body["data"]
            .as_array()
            .ok_or_else(|| EmbeddingError::ResponseParse {
                message: "No data array in response".to_string(),
            })?;

        let vectors: Vec<Vec<f32>> = data
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .ok_or_else(|| EmbeddingError::ResponseParse {
                        message: "Item without embedding".to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;

        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = texts.len();
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": texts });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| EmbeddingError::Request {
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request {
                message: format!("HTTP {}: {}", status, text),
            });
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ResponseParse {
                message: e.to_string(),
            })?;

        Self::parse_response(&json, expected)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Build the process-wide embedding handle from configuration.
pub fn build_embedding_client(config: &EmbeddingConfig) -> Arc<dyn EmbeddingClient> {
    match config.provider {
        EmbeddingProvider::Local => {
            let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.dimensions));
            Arc::new(OffloadedEmbedder::new(
                embedder,
                BlockingPool::new(config.max_blocking),
            ))
        }
        EmbeddingProvider::OpenAi => {
            let api_key = config
                .api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok());
            Arc::new(OpenAiEmbeddingClient::new(
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:8001/v1".to_string()),
                config
                    .model
                    .clone()
                    .unwrap_or_else(|| "BAAI/bge-large-en-v1.5".to_string()),
                api_key,
                config.dimensions,
            ))
        }
    }
}

/// Cosine similarity of two vectors; 0.0 when either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_normalized() {
        let embedder = HashingEmbedder::new(64);
        let vectors = embedder.embed_batch(&["Zelda Breath of the Wild".to_string()]);
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(vectors[0].len(), 64);
    }

    #[test]
    fn test_hashing_embedder_empty_text_is_zero() {
        let embedder = HashingEmbedder::new(16);
        let vectors = embedder.embed_batch(&["  ...  ".to_string()]);
        assert!(vectors[0].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedder::new(256);
        let v = embedder.embed_batch(&[
            "racing game with cars".to_string(),
            "a racing game with fast cars".to_string(),
            "cooking recipe book".to_string(),
        ]);
        assert!(cosine_similarity(&v[0], &v[1]) > cosine_similarity(&v[0], &v[2]));
    }

    #[tokio::test]
    async fn test_offloaded_embedder_matches_sync() {
        let sync = Arc::new(HashingEmbedder::new(32));
        let client = OffloadedEmbedder::new(sync.clone(), BlockingPool::new(2));
        let texts = vec!["alpha beta".to_string(), "gamma".to_string()];
        let vectors = client.embed(texts.clone()).await.unwrap();
        assert_eq!(vectors, sync.embed_batch(&texts));
        assert_eq!(client.dimensions(), 32);
    }

    #[test]
    fn test_parse_openai_embeddings() {
        let body = json!({
            "data": [
                { "index": 0, "embedding": [0.1, 0.2] },
                { "index": 1, "embedding": [0.3, 0.4] }
            ]
        });
        let vectors = OpenAiEmbeddingClient::parse_response(&body, 2).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][1] - 0.4).abs() < 1e-6);

        assert!(matches!(
            OpenAiEmbeddingClient::parse_response(&body, 3),
            Err(EmbeddingError::CountMismatch { .. })
        ));
    }

    #[test]
    fn test_build_local_client() {
        let client = build_embedding_client(&EmbeddingConfig {
            dimensions: 48,
            ..EmbeddingConfig::default()
        });
        assert_eq!(client.dimensions(), 48);
    }
}

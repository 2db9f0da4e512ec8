//! In-process RAG engine for dry runs.
//!
//! Documents are split on the literal separator, each chunk is embedded and
//! kept in memory. A query embeds the prompt, takes the most similar chunks as
//! context, and asks the completion client to answer. There is no graph and no
//! persistence; point the pipeline at an external engine for real runs.

use super::{Document, QueryMode, RagEngine, SplitDirective};
use crate::completion::{Completer, CompletionOptions};
use crate::embedding::{EmbeddingClient, cosine_similarity};
use crate::error::RagError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredChunk {
    source: PathBuf,
    text: String,
    vector: Vec<f32>,
}

/// Brute-force retrieval over an in-memory chunk list.
pub struct LocalRagEngine {
    embedder: Arc<dyn EmbeddingClient>,
    completer: Arc<dyn Completer>,
    chunks: RwLock<Vec<StoredChunk>>,
    top_chunks: usize,
}

impl LocalRagEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        completer: Arc<dyn Completer>,
        top_chunks: usize,
    ) -> Self {
        Self {
            embedder,
            completer,
            chunks: RwLock::new(Vec::new()),
            top_chunks: top_chunks.max(1),
        }
    }

    pub async fn chunk_count(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Texts of the `n` chunks most similar to `query_vector`, best first.
    async fn retrieve(&self, query_vector: &[f32], n: usize) -> Vec<(PathBuf, String)> {
        let chunks = self.chunks.read().await;
        let mut scored: Vec<(f32, &StoredChunk)> = chunks
            .iter()
            .map(|c| (cosine_similarity(query_vector, &c.vector), c))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(n)
            .map(|(_, c)| (c.source.clone(), c.text.clone()))
            .collect()
    }

    fn compose_prompt(context: &[(PathBuf, String)], prompt: &str) -> String {
        let mut out = String::from("---Context---\n");
        if context.is_empty() {
            out.push_str("(no indexed items)\n");
        }
        for (_, text) in context {
            out.push_str(text.trim());
            out.push_str("\n---\n");
        }
        out.push_str("\n---Query---\n");
        out.push_str(prompt);
        out
    }
}

#[async_trait]
impl RagEngine for LocalRagEngine {
    async fn ingest(&self, document: &Document, split: &SplitDirective) -> Result<(), RagError> {
        let pieces: Vec<String> = split
            .split(&document.content)
            .into_iter()
            .map(str::to_string)
            .collect();
        if pieces.is_empty() {
            return Err(RagError::Rejected {
                reason: format!("{} has no content", document.path.display()),
            });
        }

        // Embed everything before touching the store so a failure leaves no partial document.
        let vectors = self.embedder.embed(pieces.clone()).await?;
        let mut chunks = self.chunks.write().await;
        chunks.extend(
            pieces
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| StoredChunk {
                    source: document.path.clone(),
                    text,
                    vector,
                }),
        );
        debug!(path = %document.path.display(), total_chunks = chunks.len(), "Indexed document");
        Ok(())
    }

    async fn query(&self, prompt: &str, mode: QueryMode) -> Result<String, RagError> {
        let query_vector = self
            .embedder
            .embed(vec![prompt.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let context = self.retrieve(&query_vector, self.top_chunks).await;
        debug!(mode = %mode, context_chunks = context.len(), "Local RAG query");

        let full_prompt = Self::compose_prompt(&context, prompt);
        Ok(self
            .completer
            .complete(&full_prompt, &CompletionOptions::default())
            .await?)
    }

    fn name(&self) -> &str {
        "local"
    }
}

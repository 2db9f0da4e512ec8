//! Builds the long-lived client handles once, before any work starts.

use ragrec_core::RagRecConfig;
use ragrec_core::completion::{Completer, OpenAiCompatCompleter};
use ragrec_core::config::EngineKind;
use ragrec_core::embedding::build_embedding_client;
use ragrec_core::rag::{HttpRagEngine, LocalRagEngine, RagEngine};
use std::sync::Arc;
use tracing::debug;

/// Construct the configured RAG engine and the clients it owns.
pub fn build_engine(config: &RagRecConfig) -> anyhow::Result<Arc<dyn RagEngine>> {
    match config.rag.engine {
        EngineKind::Http => {
            debug!(base_url = %config.rag.base_url, "Using HTTP RAG engine");
            Ok(Arc::new(HttpRagEngine::new(&config.rag)?))
        }
        EngineKind::Local => {
            let completer: Arc<dyn Completer> =
                Arc::new(OpenAiCompatCompleter::new(&config.completion)?);
            let embedder = build_embedding_client(&config.embedding);
            debug!(
                model = completer.model_name(),
                dimensions = embedder.dimensions(),
                "Using local RAG engine"
            );
            Ok(Arc::new(LocalRagEngine::new(
                embedder,
                completer,
                config.rag.top_chunks,
            )))
        }
    }
}

//! # ragrec core
//!
//! Library behind the `ragrec` next-item recommendation runner.
//! Provides the completion and embedding clients, RAG engine adapters, item
//! document ingestion, the batched query orchestrator, ranking metrics,
//! configuration, and the experiment driver that ties them together.

pub mod completion;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod ingest;
pub mod offload;
pub mod orchestrator;
pub mod prompt;
pub mod rag;

// Re-export commonly used types at the crate root.
pub use completion::{Completer, CompletionOptions, MockCompleter, MockReply, OpenAiCompatCompleter};
pub use config::{EngineKind, RagRecConfig, load_config};
pub use dataset::{CandidateLists, PredictionRecord, SequenceEntry};
pub use embedding::{Embedder, EmbeddingClient, HashingEmbedder, build_embedding_client};
pub use error::RagRecError;
pub use evaluate::{EvaluationReport, EvaluationResult, evaluate};
pub use experiment::{Experiment, ExperimentOutcome, ExperimentPaths, ExperimentSettings};
pub use ingest::{IngestPipeline, IngestReport};
pub use offload::BlockingPool;
pub use orchestrator::{JobOutcome, QueryOrchestrator, RunSummary};
pub use rag::{Document, HttpRagEngine, LocalRagEngine, QueryMode, RagEngine, SplitDirective};

//! Error types for the ragrec core library.
//!
//! Uses `thiserror` for public API error types. Per-user query failures never
//! surface through these types to the caller of the orchestrator; they are
//! contained inside the job and turned into retries or sentinel placeholders.

use std::path::PathBuf;

/// Top-level error type for the ragrec core library.
#[derive(Debug, thiserror::Error)]
pub enum RagRecError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Errors from the completion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for endpoint {endpoint}")]
    AuthFailed { endpoint: String },

    #[error("Rate limited by endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Endpoint connection failed: {message}")]
    Connection { message: String },
}

/// Errors from a RAG engine ingest or query call.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("RAG transport failed: {message}")]
    Transport { message: String },

    #[error("RAG engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("RAG response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Document rejected: {reason}")]
    Rejected { reason: String },

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Errors from embedding providers and the blocking offload pool.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {message}")]
    Request { message: String },

    #[error("Embedding response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Offloaded work failed: {0}")]
    Offload(#[from] OffloadError),
}

/// Errors from the blocking offload pool.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    #[error("Blocking pool is closed")]
    Closed,

    #[error("Blocking task panicked or was cancelled: {message}")]
    Join { message: String },
}

/// Errors from startup validation of the experiment inputs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required input file not found: {path}")]
    FileNotFound { path: PathBuf },
}

/// Errors reading or writing dataset, prediction, and report files.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

//! RAG engine interface and adapters.
//!
//! The engine is a black box with two operations: ingest a document and answer
//! a natural-language query. Its graph, vector store, and retrieval logic are
//! not modelled here.

pub mod http;
pub mod local;

use crate::error::RagError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use http::HttpRagEngine;
pub use local::LocalRagEngine;

/// How candidates reach the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Only the history goes into the prompt; the engine retrieves candidates.
    ColdRag,
    /// The candidate list is written into the prompt explicitly.
    Hybrid,
}

impl QueryMode {
    /// Mode string passed to the engine.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdRag => "coldrag",
            Self::Hybrid => "hybrid",
        }
    }

    /// Whether the prompt lists candidates explicitly.
    pub fn includes_candidates(&self) -> bool {
        matches!(self, Self::Hybrid)
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coldrag" => Ok(Self::ColdRag),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown mode '{other}' (expected coldrag or hybrid)")),
        }
    }
}

/// How the engine should split a document into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitDirective {
    /// Literal separator.
    pub separator: String,
    /// When set, split on the separator only, never by length.
    pub separator_only: bool,
}

impl SplitDirective {
    pub fn literal(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            separator_only: true,
        }
    }

    /// Split `text` on the separator, dropping blank pieces.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if self.separator.is_empty() {
            return vec![text];
        }
        text.split(self.separator.as_str())
            .filter(|piece| !piece.trim().is_empty())
            .collect()
    }
}

/// A document handed to the engine for indexing.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub content: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// The external retrieval-augmented generation engine.
#[async_trait]
pub trait RagEngine: Send + Sync {
    /// Insert one document. Completes or fails as a unit.
    async fn ingest(&self, document: &Document, split: &SplitDirective) -> Result<(), RagError>;

    /// Answer a natural-language query.
    async fn query(&self, prompt: &str, mode: QueryMode) -> Result<String, RagError>;

    /// Short engine name for logs.
    fn name(&self) -> &str;
}

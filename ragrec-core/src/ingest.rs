//! Sequential document ingestion into a RAG engine.

use crate::rag::{Document, RagEngine, SplitDirective};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A document that could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of an ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Documents the pass tried to ingest, after the limit.
    pub attempted: usize,
    pub ingested: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    fn fail(&mut self, path: &Path, error: impl ToString) {
        let error = error.to_string();
        warn!(path = %path.display(), error = %error, "Failed to ingest document");
        self.failures.push(IngestFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Files under `dir` with extension `extension`, sorted by path.
///
/// A missing directory yields no documents.
pub fn discover_documents(dir: &Path, extension: &str) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Item text directory not found, skipping indexing");
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();
    paths
}

/// A limit of zero means no limit.
fn effective_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|&l| l > 0)
}

/// Feeds documents to an engine one at a time with a fixed split directive.
pub struct IngestPipeline {
    engine: Arc<dyn RagEngine>,
    split: SplitDirective,
}

impl IngestPipeline {
    pub fn new(engine: Arc<dyn RagEngine>, split: SplitDirective) -> Self {
        Self { engine, split }
    }

    /// Ingest in-memory documents. Each call finishes before the next begins;
    /// a failed document is logged and skipped.
    pub async fn ingest_all(&self, documents: Vec<Document>, limit: Option<usize>) -> IngestReport {
        let mut report = IngestReport::default();
        let total = effective_limit(limit).unwrap_or(usize::MAX);
        for document in documents.into_iter().take(total) {
            report.attempted += 1;
            match self.engine.ingest(&document, &self.split).await {
                Ok(()) => report.ingested += 1,
                Err(e) => report.fail(&document.path, e),
            }
        }
        self.log_report(&report);
        report
    }

    /// Read and ingest files. Unreadable files count as failures.
    pub async fn ingest_paths(&self, paths: &[PathBuf], limit: Option<usize>) -> IngestReport {
        let mut report = IngestReport::default();
        let total = effective_limit(limit).map_or(paths.len(), |l| l.min(paths.len()));
        for (i, path) in paths.iter().take(total).enumerate() {
            report.attempted += 1;
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    report.fail(path, e);
                    continue;
                }
            };
            let document = Document::new(path.clone(), content);
            match self.engine.ingest(&document, &self.split).await {
                Ok(()) => {
                    report.ingested += 1;
                    info!(done = i + 1, total, path = %path.display(), "Indexed document");
                }
                Err(e) => report.fail(path, e),
            }
        }
        self.log_report(&report);
        report
    }

    /// Discover and ingest every matching file under `dir`.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        extension: &str,
        limit: Option<usize>,
    ) -> IngestReport {
        let paths = discover_documents(dir, extension);
        self.ingest_paths(&paths, limit).await
    }

    fn log_report(&self, report: &IngestReport) {
        info!(
            engine = self.engine.name(),
            attempted = report.attempted,
            ingested = report.ingested,
            failed = report.failures.len(),
            "Ingestion finished"
        );
    }
}

//! Configuration system for ragrec.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment. CLI flags are
//! applied on top by the binary after loading.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::rag::QueryMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagRecConfig {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

/// Remote chat-completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Full URL of the OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    /// Model identifier sent in every request.
    pub model: String,
    /// Environment variable holding a bearer token. Local servers need none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Context length the model server was started with.
    pub max_model_len: usize,
    /// Explicit generation cap. Defaults to half of `max_model_len`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub temperature: f32,
    pub top_p: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "Qwen/Qwen2.5-7B-Instruct".to_string(),
            api_key_env: None,
            max_model_len: 131_072,
            max_tokens: None,
            temperature: 0.0,
            top_p: 1.0,
            timeout_secs: 600,
        }
    }
}

impl CompletionConfig {
    /// Generation cap used when a caller does not set one.
    pub fn default_max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or(self.max_model_len / 2)
    }

    /// Validate this config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.default_max_tokens() >= self.max_model_len {
            warnings.push(format!(
                "max_tokens ({}) >= max_model_len ({}); requests will be rejected by the server",
                self.default_max_tokens(),
                self.max_model_len
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "temperature ({}) is outside the usual range [0.0, 2.0]",
                self.temperature
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            warnings.push(format!("top_p ({}) should be in (0.0, 1.0]", self.top_p));
        }
        warnings
    }
}

/// Which embedding backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// In-process hashing embedder, run on the blocking pool.
    Local,
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
}

/// Embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Base URL for the remote provider, e.g. `http://localhost:8001/v1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub dimensions: usize,
    /// Maximum number of blocking embedding jobs running at once.
    pub max_blocking: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: None,
            base_url: None,
            api_key_env: None,
            dimensions: 1024,
            max_blocking: 4,
        }
    }
}

/// Which RAG engine adapter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External RAG server reached over HTTP.
    Http,
    /// In-process engine for dry runs.
    Local,
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown engine '{other}' (expected http or local)")),
        }
    }
}

/// RAG engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub engine: EngineKind,
    /// Base URL of the external RAG server.
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    /// Number of chunks the local engine places in the context.
    pub top_chunks: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Http,
            base_url: "http://localhost:9621".to_string(),
            api_key_env: None,
            timeout_secs: 900,
            top_chunks: 8,
        }
    }
}

/// Query orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub mode: QueryMode,
    /// Number of ranked items required per user.
    pub k: usize,
    /// Users dispatched together before waiting for the batch to finish.
    pub batch_size: usize,
    /// Cap on in-flight queries, independent of the batch size.
    pub concurrency: usize,
    /// Total attempts per user, including the first.
    pub max_retries: usize,
    /// Fixed wait between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// Most recent history titles placed in the prompt.
    pub history_window: usize,
    /// Placeholder for prediction slots that could not be resolved.
    pub sentinel: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: QueryMode::ColdRag,
            k: 20,
            batch_size: 20,
            concurrency: 10,
            max_retries: 5,
            backoff_ms: 1200,
            history_window: 20,
            sentinel: "UNKNOWN".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Number of queries allowed in flight at once.
    pub fn effective_concurrency(&self) -> usize {
        self.batch_size.min(self.concurrency).max(1)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.k == 0 {
            warnings.push("k is 0; every prediction list will be empty".to_string());
        }
        if self.batch_size == 0 {
            warnings.push("batch_size is 0; treating it as 1".to_string());
        }
        if self.concurrency == 0 {
            warnings.push("concurrency is 0; treating it as 1".to_string());
        }
        if self.max_retries == 0 {
            warnings.push(
                "max_retries is 0; no query will be attempted and every user gets placeholders"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Document ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Literal separator the engine splits item documents on.
    pub separator: String,
    /// Split only on the separator, never by length.
    pub separator_only: bool,
    /// Only files with this extension are ingested.
    pub extension: String,
    /// Ingest at most this many documents; 0 means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            separator: "\n\n###".to_string(),
            separator_only: true,
            extension: "txt".to_string(),
            limit: None,
        }
    }
}

/// Dataset location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root directory holding one folder per dataset.
    pub data_root: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./dataset"),
        }
    }
}

impl RagRecConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.completion.validate();
        warnings.extend(self.orchestrator.validate());
        if self.embedding.dimensions == 0 {
            warnings.push("embedding.dimensions is 0".to_string());
        }
        warnings
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `RAGREC_`, nested with `__`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.ragrec/config.toml`)
/// 4. User config (`~/.config/ragrec/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<RagRecConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RagRecConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "ragrec", "ragrec") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".ragrec").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    // RAGREC_ORCHESTRATOR__BATCH_SIZE, RAGREC_COMPLETION__MODEL, ...
    figment = figment.merge(Env::prefixed("RAGREC_").split("__"));

    figment.extract().map_err(Box::new)
}

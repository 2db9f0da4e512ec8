//! End-to-end experiment: index, rank, evaluate.

use crate::config::{IngestConfig, OrchestratorConfig};
use crate::dataset::{self, PredictionRecord};
use crate::error::{ConfigError, RagRecError};
use crate::evaluate::{EvaluationReport, evaluate, write_report};
use crate::ingest::{IngestPipeline, IngestReport};
use crate::orchestrator::{QueryOrchestrator, RunSummary};
use crate::rag::{RagEngine, SplitDirective};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Input locations for one dataset at one core level.
///
/// ```text
/// <data_root>/<dataset>/processed/data_eval_<core>.json
/// <data_root>/<dataset>/processed/candidate_list_<cand_size>_<core>.json
/// <data_root>/<dataset>/processed/item_text_<core>/*.txt
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentPaths {
    pub sequences: PathBuf,
    pub candidates: PathBuf,
    pub item_text_dir: PathBuf,
}

impl ExperimentPaths {
    pub fn new(data_root: &Path, dataset: &str, core: u32, cand_size: usize) -> Self {
        let processed = data_root.join(dataset).join("processed");
        Self {
            sequences: processed.join(format!("data_eval_{core}.json")),
            candidates: processed.join(format!("candidate_list_{cand_size}_{core}.json")),
            item_text_dir: processed.join(format!("item_text_{core}")),
        }
    }

    /// Both JSON inputs must exist before anything else runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.candidates, &self.sequences] {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound { path: path.clone() });
            }
        }
        Ok(())
    }
}

/// Evaluation report path for a predictions file: `preds.json` -> `preds_eval.json`.
pub fn eval_path_for(out: &Path) -> PathBuf {
    let name = out
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let eval_name = match name.strip_suffix(".json") {
        Some(stem) => format!("{stem}_eval.json"),
        None => format!("{name}_eval.json"),
    };
    out.with_file_name(eval_name)
}

/// Run-level settings that are not part of the layered configuration.
#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub model: String,
    pub dataset: String,
    pub out: PathBuf,
    pub skip_index: bool,
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    /// `None` when indexing was skipped.
    pub ingest: Option<IngestReport>,
    /// `None` when predictions were reused from an earlier run.
    pub run: Option<RunSummary>,
    pub report: EvaluationReport,
    pub eval_path: PathBuf,
}

impl ExperimentOutcome {
    pub fn resumed(&self) -> bool {
        self.run.is_none()
    }
}

pub struct Experiment {
    paths: ExperimentPaths,
    settings: ExperimentSettings,
    ingest_config: IngestConfig,
    pipeline: IngestPipeline,
    orchestrator: QueryOrchestrator,
}

impl Experiment {
    pub fn new(
        paths: ExperimentPaths,
        settings: ExperimentSettings,
        engine: Arc<dyn RagEngine>,
        orchestrator_config: OrchestratorConfig,
        ingest_config: IngestConfig,
    ) -> Self {
        let split = SplitDirective {
            separator: ingest_config.separator.clone(),
            separator_only: ingest_config.separator_only,
        };
        Self {
            paths,
            settings,
            pipeline: IngestPipeline::new(engine.clone(), split),
            orchestrator: QueryOrchestrator::new(engine, orchestrator_config),
            ingest_config,
        }
    }

    pub fn paths(&self) -> &ExperimentPaths {
        &self.paths
    }

    pub async fn run(&self) -> Result<ExperimentOutcome, RagRecError> {
        self.paths.validate()?;
        let candidates = dataset::load_candidates(&self.paths.candidates).await?;
        info!(
            users = candidates.len(),
            path = %self.paths.candidates.display(),
            "Loaded candidate lists"
        );

        let ingest = if self.settings.skip_index {
            info!("Skipping indexing");
            None
        } else {
            Some(
                self.pipeline
                    .ingest_directory(
                        &self.paths.item_text_dir,
                        &self.ingest_config.extension,
                        self.ingest_config.limit,
                    )
                    .await,
            )
        };

        let out = &self.settings.out;
        let (records, run): (Vec<PredictionRecord>, Option<RunSummary>) = if out.exists() {
            info!(path = %out.display(), "Predictions exist, reusing them");
            (dataset::read_predictions(out).await?, None)
        } else {
            let entries = dataset::load_sequences(&self.paths.sequences).await?;
            let (records, summary) = self.orchestrator.run(entries, &candidates).await;
            dataset::write_predictions(out, &records).await?;
            info!(path = %out.display(), records = records.len(), "Wrote predictions");
            (records, Some(summary))
        };

        let k = self.orchestrator.config().k;
        let result = evaluate(&records, k);
        info!(
            k,
            recall = result.recall,
            ndcg = result.ndcg,
            mrr = result.mrr,
            "Evaluation finished"
        );

        let report = EvaluationReport::new(&self.settings.model, &self.settings.dataset, k, result);
        let eval_path = eval_path_for(out);
        write_report(&eval_path, &report).await?;
        info!(path = %eval_path.display(), "Wrote evaluation report");

        Ok(ExperimentOutcome {
            ingest,
            run,
            report,
            eval_path,
        })
    }
}

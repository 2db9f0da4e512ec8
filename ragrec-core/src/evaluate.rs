//! Ranking metrics over prediction records.

use crate::dataset::{PredictionRecord, write_json};
use crate::error::DatasetError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::path::Path;

/// Mean Recall@k, NDCG@k and MRR@k over a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluationResult {
    pub recall: f64,
    pub ndcg: f64,
    pub mrr: f64,
}

/// Zero-based position of `target` among the first `k` predictions.
pub fn rank_of(predictions: &[String], target: &str, k: usize) -> Option<usize> {
    predictions.iter().take(k).position(|p| p == target)
}

/// Score `records` against their held-out titles.
///
/// With a single relevant item per user the gain at rank `r` is
/// `1 / log2(r + 2)`. The sum is not divided by an ideal DCG, so NDCG here equals
/// DCG. Records whose true title is absent contribute zero but still count
/// toward the mean.
pub fn evaluate(records: &[PredictionRecord], k: usize) -> EvaluationResult {
    let n = records.len();
    if n == 0 {
        return EvaluationResult::default();
    }

    let mut hits = 0.0;
    let mut ndcg = 0.0;
    let mut mrr = 0.0;
    for record in records {
        if let Some(rank) = rank_of(&record.predicted_items, &record.entry.true_title, k) {
            hits += 1.0;
            ndcg += 1.0 / ((rank + 2) as f64).log2();
            mrr += 1.0 / (rank + 1) as f64;
        }
    }

    let n = n as f64;
    EvaluationResult {
        recall: hits / n,
        ndcg: ndcg / n,
        mrr: mrr / n,
    }
}

/// Metric block keyed `Recall@k`, `NDCG@k`, `MRR@k`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
    pub k: usize,
    pub result: EvaluationResult,
}

impl Serialize for MetricSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(&format!("Recall@{}", self.k), &self.result.recall)?;
        map.serialize_entry(&format!("NDCG@{}", self.k), &self.result.ndcg)?;
        map.serialize_entry(&format!("MRR@{}", self.k), &self.result.mrr)?;
        map.end()
    }
}

/// The evaluation file written next to the predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub model: String,
    pub dataset: String,
    pub k: usize,
    pub metrics: MetricSet,
}

impl EvaluationReport {
    pub fn new(
        model: impl Into<String>,
        dataset: impl Into<String>,
        k: usize,
        result: EvaluationResult,
    ) -> Self {
        Self {
            model: model.into(),
            dataset: dataset.into(),
            k,
            metrics: MetricSet { k, result },
        }
    }

    pub fn result(&self) -> EvaluationResult {
        self.metrics.result
    }
}

pub async fn write_report(path: &Path, report: &EvaluationReport) -> Result<(), DatasetError> {
    write_json(path, report).await
}

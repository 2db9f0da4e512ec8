//! Evaluation dataset, candidate lists, and prediction files.

use crate::error::DatasetError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// One user's purchase sequence and the held-out next item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    /// Purchased titles, most recent last.
    #[serde(rename = "input", default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub true_title: String,
    /// Any other fields of the source entry, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SequenceEntry {
    pub fn new(
        user_id: impl Into<String>,
        history: Vec<String>,
        true_title: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            history,
            true_title: true_title.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// The last `window` titles of the history.
    pub fn recent_history(&self, window: usize) -> &[String] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "user_id must be a string or number, got {other}"
        ))),
    }
}

/// Candidate titles per user, in presentation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateLists(HashMap<String, Vec<String>>);

impl CandidateLists {
    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        Self(map)
    }

    /// Candidates for `user_id`; empty when the user has none.
    pub fn get(&self, user_id: &str) -> &[String] {
        self.0.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A sequence entry with the model's ranked predictions attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(flatten)]
    pub entry: SequenceEntry,
    #[serde(default)]
    pub predicted_items: Vec<String>,
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DatasetError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| DatasetError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` as pretty JSON, creating parent directories as needed.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DatasetError> {
    let write_err = |source| DatasetError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let body = serde_json::to_vec_pretty(value).map_err(|source| DatasetError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, body).await.map_err(write_err)
}

/// Load the evaluation sequences (a JSON array).
pub async fn load_sequences(path: &Path) -> Result<Vec<SequenceEntry>, DatasetError> {
    read_json(path).await
}

/// Load candidate lists (a JSON object keyed by user id).
pub async fn load_candidates(path: &Path) -> Result<CandidateLists, DatasetError> {
    read_json(path).await
}

/// Read a predictions file written by an earlier run.
pub async fn read_predictions(path: &Path) -> Result<Vec<PredictionRecord>, DatasetError> {
    read_json(path).await
}

pub async fn write_predictions(
    path: &Path,
    records: &[PredictionRecord],
) -> Result<(), DatasetError> {
    write_json(path, records).await
}

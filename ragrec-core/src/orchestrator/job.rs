//! Per-user query job and its retry state machine.
//!
//! ```text
//! PENDING -> IN_FLIGHT -> VALIDATED
//!                |
//!                v
//!              RETRY -> IN_FLIGHT (after backoff)
//!                |
//!                v
//!            EXHAUSTED (k sentinel placeholders)
//! ```

use super::parse::extract_ranked_lines;
use crate::dataset::SequenceEntry;
use std::fmt;

/// One user's unit of work for a single batch.
#[derive(Debug)]
pub struct BatchJob<'a> {
    pub entry: SequenceEntry,
    /// Candidates offered to the model, in stored order.
    pub candidates: &'a [String],
    pub k: usize,
}

/// Why an attempt did not validate.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryReason {
    /// The engine or transport failed.
    Engine(String),
    /// The response parsed into fewer than `k` items.
    Short { parsed: usize },
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(message) => write!(f, "engine error: {message}"),
            Self::Short { parsed } => write!(f, "only {parsed} ranked lines"),
        }
    }
}

/// State of a job. Attempts are numbered from 1.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    InFlight { attempt: usize },
    Retry { attempt: usize, reason: RetryReason },
    Validated { items: Vec<String>, attempts: usize },
    Exhausted { attempts: usize },
}

impl JobState {
    /// Leave `Pending`. With no attempts allowed the job is exhausted at once;
    /// with `k == 0` there is nothing to ask for.
    pub fn start(k: usize, max_attempts: usize) -> Self {
        if k == 0 {
            Self::Validated {
                items: Vec::new(),
                attempts: 0,
            }
        } else if max_attempts == 0 {
            Self::Exhausted { attempts: 0 }
        } else {
            Self::InFlight { attempt: 1 }
        }
    }

    /// Transition out of `InFlight` on a returned response.
    pub fn on_response(attempt: usize, text: &str, k: usize) -> Self {
        let mut items = extract_ranked_lines(text, k);
        if items.len() >= k {
            items.truncate(k);
            Self::Validated {
                items,
                attempts: attempt,
            }
        } else {
            Self::Retry {
                attempt,
                reason: RetryReason::Short {
                    parsed: items.len(),
                },
            }
        }
    }

    /// Transition out of `InFlight` on an engine error.
    pub fn on_error(attempt: usize, error: impl fmt::Display) -> Self {
        Self::Retry {
            attempt,
            reason: RetryReason::Engine(error.to_string()),
        }
    }

    /// Transition out of `Retry`: another attempt, or exhaustion.
    pub fn after_retry(attempt: usize, max_attempts: usize) -> Self {
        if attempt >= max_attempts {
            Self::Exhausted { attempts: attempt }
        } else {
            Self::InFlight {
                attempt: attempt + 1,
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated { .. } | Self::Exhausted { .. })
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Validated { items: Vec<String>, attempts: usize },
    /// Degraded success: every slot holds the sentinel.
    Exhausted { items: Vec<String>, attempts: usize },
}

impl JobOutcome {
    pub fn exhausted(k: usize, sentinel: &str, attempts: usize) -> Self {
        Self::Exhausted {
            items: vec![sentinel.to_string(); k],
            attempts,
        }
    }

    pub fn items(&self) -> &[String] {
        match self {
            Self::Validated { items, .. } | Self::Exhausted { items, .. } => items,
        }
    }

    pub fn into_items(self) -> Vec<String> {
        match self {
            Self::Validated { items, .. } | Self::Exhausted { items, .. } => items,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            Self::Validated { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

//! Batched, bounded-concurrency query orchestration.
//!
//! Users are processed in batches of `batch_size`. Every job in a batch is
//! dispatched at once and the batch is awaited as a whole before the next one
//! starts. A semaphore caps the number of queries actually in flight. Each job
//! walks the [`JobState`] machine until it validates or exhausts its attempts;
//! neither engine errors nor short responses ever escape a job.

pub mod job;
pub mod parse;

pub use job::{BatchJob, JobOutcome, JobState, RetryReason};
pub use parse::extract_ranked_lines;

use crate::config::OrchestratorConfig;
use crate::dataset::{CandidateLists, PredictionRecord, SequenceEntry};
use crate::prompt::{PromptTemplate, RankingPrompt};
use crate::rag::RagEngine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Totals for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub users: usize,
    pub batches: usize,
    pub validated: usize,
    pub exhausted: usize,
    /// Query attempts across all users.
    pub attempts: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            users: 0,
            batches: 0,
            validated: 0,
            exhausted: 0,
            attempts: 0,
            started_at,
            finished_at: started_at,
        }
    }

    fn record(&mut self, outcome: &JobOutcome) {
        self.users += 1;
        self.attempts += outcome.attempts();
        if outcome.is_exhausted() {
            self.exhausted += 1;
        } else {
            self.validated += 1;
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Drives ranking queries for every user against a RAG engine.
pub struct QueryOrchestrator {
    engine: Arc<dyn RagEngine>,
    prompt: Arc<dyn PromptTemplate>,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
}

impl QueryOrchestrator {
    pub fn new(engine: Arc<dyn RagEngine>, config: OrchestratorConfig) -> Self {
        let prompt = Arc::new(RankingPrompt::new(config.mode, config.history_window));
        let permits = Arc::new(Semaphore::new(config.effective_concurrency()));
        Self {
            engine,
            prompt,
            config,
            permits,
        }
    }

    /// Replace the default ranking prompt.
    pub fn with_prompt(mut self, prompt: Arc<dyn PromptTemplate>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Rank every user. Records come back in input order, each with exactly
    /// `k` predicted items.
    pub async fn run(
        &self,
        entries: Vec<SequenceEntry>,
        candidates: &CandidateLists,
    ) -> (Vec<PredictionRecord>, RunSummary) {
        let mut summary = RunSummary::new(Utc::now());
        let total = entries.len();
        let batch_size = self.config.batch_size.max(1);
        let total_batches = total.div_ceil(batch_size);
        let mut records = Vec::with_capacity(total);

        info!(
            users = total,
            batch_size,
            concurrency = self.config.effective_concurrency(),
            mode = %self.config.mode,
            k = self.config.k,
            "Starting query orchestration"
        );

        let mut pending = entries.into_iter().peekable();
        while pending.peek().is_some() {
            let jobs: Vec<BatchJob<'_>> = pending
                .by_ref()
                .take(batch_size)
                .map(|entry| {
                    let candidates = candidates.get(&entry.user_id);
                    BatchJob {
                        entry,
                        candidates,
                        k: self.config.k,
                    }
                })
                .collect();

            let results =
                futures::future::join_all(jobs.into_iter().map(|job| self.run_job(job))).await;
            summary.batches += 1;

            let mut batch_exhausted = 0;
            for (entry, outcome) in results {
                summary.record(&outcome);
                if outcome.is_exhausted() {
                    batch_exhausted += 1;
                }
                records.push(PredictionRecord {
                    entry,
                    predicted_items: outcome.into_items(),
                });
            }

            info!(
                batch = summary.batches,
                total_batches,
                done = records.len(),
                users = total,
                exhausted = batch_exhausted,
                "Batch complete"
            );
        }

        summary.finished_at = Utc::now();
        info!(
            users = summary.users,
            validated = summary.validated,
            exhausted = summary.exhausted,
            attempts = summary.attempts,
            elapsed_ms = summary.elapsed().num_milliseconds(),
            "Query orchestration finished"
        );
        (records, summary)
    }

    async fn run_job(&self, job: BatchJob<'_>) -> (SequenceEntry, JobOutcome) {
        let k = job.k;
        let max_attempts = self.config.max_retries;
        let prompt = self.prompt.render(&job.entry, job.candidates, k);
        let user_id = job.entry.user_id.as_str();

        let mut state = JobState::Pending;
        let outcome = loop {
            state = match state {
                JobState::Pending => JobState::start(k, max_attempts),
                JobState::InFlight { attempt } => {
                    debug!(user_id, attempt, "Querying engine");
                    let Ok(_permit) = self.permits.acquire().await else {
                        warn!(user_id, attempt, "Concurrency limiter closed");
                        state = JobState::on_error(attempt, "concurrency limiter closed");
                        continue;
                    };
                    match self.engine.query(&prompt, self.config.mode).await {
                        Ok(text) => JobState::on_response(attempt, &text, k),
                        Err(e) => JobState::on_error(attempt, e),
                    }
                }
                JobState::Retry { attempt, reason } => {
                    match &reason {
                        RetryReason::Engine(error) => {
                            warn!(user_id, attempt, error = %error, "Query attempt failed")
                        }
                        RetryReason::Short { parsed } => {
                            info!(user_id, attempt, parsed, k, "Response too short, retrying")
                        }
                    }
                    let next = JobState::after_retry(attempt, max_attempts);
                    if matches!(next, JobState::InFlight { .. }) {
                        tokio::time::sleep(Duration::from_millis(self.config.backoff_ms)).await;
                    }
                    next
                }
                JobState::Validated { items, attempts } => {
                    break JobOutcome::Validated { items, attempts };
                }
                JobState::Exhausted { attempts } => {
                    warn!(user_id, attempts, "Query attempts exhausted, using placeholders");
                    break JobOutcome::exhausted(k, &self.config.sentinel, attempts);
                }
            };
        };
        (job.entry, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::rag::{Document, QueryMode, SplitDirective};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    type Responder = Box<dyn Fn(&str, usize) -> Result<String, RagError> + Send + Sync>;

    /// Engine whose replies are computed from the prompt and the per-prompt call count.
    struct ScriptedEngine {
        respond: Responder,
        delay: Box<dyn Fn(&str) -> Duration + Send + Sync>,
        calls: Mutex<HashMap<String, usize>>,
        total_calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        /// Start and finish instant of each user's most recent query.
        spans: Mutex<HashMap<usize, (Instant, Instant)>>,
    }

    impl ScriptedEngine {
        fn new(
            respond: impl Fn(&str, usize) -> Result<String, RagError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                delay: Box::new(|_| Duration::from_millis(5)),
                calls: Mutex::new(HashMap::new()),
                total_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                spans: Mutex::new(HashMap::new()),
            }
        }

        fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
            self.delay = Box::new(delay);
            self
        }

        fn total_calls(&self) -> usize {
            self.total_calls.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        fn span(&self, user: usize) -> (Instant, Instant) {
            self.spans.lock().unwrap()[&user]
        }
    }

    #[async_trait]
    impl RagEngine for ScriptedEngine {
        async fn ingest(&self, _: &Document, _: &SplitDirective) -> Result<(), RagError> {
            Ok(())
        }

        async fn query(&self, prompt: &str, _mode: QueryMode) -> Result<String, RagError> {
            let nth = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(prompt.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let started = Instant::now();
            tokio::time::sleep((self.delay)(prompt)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.spans
                .lock()
                .unwrap()
                .insert(user_index(prompt), (started, Instant::now()));
            (self.respond)(prompt, nth)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn config(k: usize, batch_size: usize, concurrency: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            k,
            batch_size,
            concurrency,
            backoff_ms: 1,
            ..OrchestratorConfig::default()
        }
    }

    fn users(n: usize) -> Vec<SequenceEntry> {
        (0..n)
            .map(|i| SequenceEntry::new(format!("u{i}"), vec![format!("hist-{i}")], "x"))
            .collect()
    }

    /// Index encoded in the `hist-<i>` title of a rendered prompt.
    fn user_index(prompt: &str) -> usize {
        let start = prompt.find("hist-").map(|p| p + 5).unwrap_or(0);
        prompt[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_well_formed_response_takes_one_attempt() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok("1. A\n2. B\n3. C".into())));
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(3, 20, 10));
        let (records, summary) = orchestrator.run(users(1), &CandidateLists::default()).await;

        assert_eq!(records[0].predicted_items, vec!["A", "B", "C"]);
        assert_eq!(engine.total_calls(), 1);
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.validated, 1);
    }

    #[tokio::test]
    async fn test_short_response_retries_then_exhausts() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok("1. A\n2. B".into())));
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(3, 20, 10));
        let (records, summary) = orchestrator.run(users(1), &CandidateLists::default()).await;

        assert_eq!(records[0].predicted_items, vec!["UNKNOWN"; 3]);
        assert_eq!(engine.total_calls(), 5);
        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.attempts, 5);
    }

    #[tokio::test]
    async fn test_recovers_after_errors() {
        let engine = Arc::new(ScriptedEngine::new(|_, nth| {
            if nth < 3 {
                Err(RagError::Transport {
                    message: "connection reset".into(),
                })
            } else {
                Ok("1. A\n2. B".into())
            }
        }));
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(2, 20, 10));
        let (records, summary) = orchestrator.run(users(1), &CandidateLists::default()).await;

        assert_eq!(records[0].predicted_items, vec!["A", "B"]);
        assert_eq!(engine.total_calls(), 3);
        assert_eq!(summary.validated, 1);
    }

    #[tokio::test]
    async fn test_long_response_truncated_to_k() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok("1. A\n2. B\n3. C\n4. D".into())));
        let orchestrator = QueryOrchestrator::new(engine, config(2, 20, 10));
        let (records, _) = orchestrator.run(users(3), &CandidateLists::default()).await;
        assert!(records.iter().all(|r| r.predicted_items == vec!["A", "B"]));
    }

    #[tokio::test]
    async fn test_every_record_has_k_items() {
        // Even users succeed, odd users always fail.
        let engine = Arc::new(ScriptedEngine::new(|prompt, _| {
            if user_index(prompt) % 2 == 0 {
                Ok("1. A\n2. B\n3. C\n4. D".into())
            } else {
                Err(RagError::Status {
                    status: 500,
                    body: "boom".into(),
                })
            }
        }));
        let orchestrator = QueryOrchestrator::new(engine, config(4, 3, 2));
        let (records, summary) = orchestrator.run(users(7), &CandidateLists::default()).await;

        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.predicted_items.len() == 4));
        assert_eq!(summary.validated, 4);
        assert_eq!(summary.exhausted, 3);
    }

    #[tokio::test]
    async fn test_batches_and_concurrency_bound() {
        let engine = Arc::new(
            ScriptedEngine::new(|_, _| Ok("1. A".into())).with_delay(|_| Duration::from_millis(20)),
        );
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(1, 2, 10));
        let (records, summary) = orchestrator.run(users(5), &CandidateLists::default()).await;

        assert_eq!(records.len(), 5);
        assert_eq!(summary.batches, 3);
        assert!(engine.peak() <= 2, "peak {} exceeded batch size", engine.peak());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_batch_waits_for_slowest_job() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok("1. A".into())).with_delay(
            |prompt| match user_index(prompt) {
                0 => Duration::from_millis(60),
                _ => Duration::from_millis(5),
            },
        ));
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(1, 2, 10));
        let (records, summary) = orchestrator.run(users(3), &CandidateLists::default()).await;

        assert_eq!(records.len(), 3);
        assert_eq!(summary.batches, 2);
        let (_, slow_finished) = engine.span(0);
        let (fast_started, fast_finished) = engine.span(1);
        let (next_started, _) = engine.span(2);
        assert!(fast_finished < slow_finished);
        assert!(fast_started < next_started);
        assert!(next_started >= slow_finished, "u2 started before u0 finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_between_attempts_only() {
        let engine = Arc::new(
            ScriptedEngine::new(|_, _| {
                Err(RagError::Transport {
                    message: "connection refused".into(),
                })
            })
            .with_delay(|_| Duration::ZERO),
        );
        let orchestrator = QueryOrchestrator::new(
            engine.clone(),
            OrchestratorConfig {
                k: 2,
                max_retries: 3,
                backoff_ms: 1200,
                ..OrchestratorConfig::default()
            },
        );

        let started = Instant::now();
        let (records, summary) = orchestrator.run(users(1), &CandidateLists::default()).await;
        let elapsed = started.elapsed();

        assert_eq!(records[0].predicted_items, vec!["UNKNOWN"; 2]);
        assert_eq!(engine.total_calls(), 3);
        assert_eq!(summary.attempts, 3);
        // Two sleeps between three attempts, none after the last one.
        assert!(elapsed >= Duration::from_millis(2400), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3600), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_closed_limiter_exhausts_without_queries() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok("1. A\n2. B".into())));
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(2, 4, 2));
        orchestrator.permits.close();
        let (records, summary) = orchestrator.run(users(2), &CandidateLists::default()).await;

        assert_eq!(engine.total_calls(), 0);
        assert!(records.iter().all(|r| r.predicted_items == vec!["UNKNOWN"; 2]));
        assert_eq!(summary.exhausted, 2);
        assert_eq!(summary.attempts, 2 * OrchestratorConfig::default().max_retries);
    }

    #[tokio::test]
    async fn test_concurrency_limit_below_batch_size() {
        let engine = Arc::new(
            ScriptedEngine::new(|_, _| Ok("1. A".into())).with_delay(|_| Duration::from_millis(20)),
        );
        let orchestrator = QueryOrchestrator::new(engine.clone(), config(1, 8, 3));
        let (_, summary) = orchestrator.run(users(8), &CandidateLists::default()).await;

        assert_eq!(summary.batches, 1);
        assert!(engine.peak() <= 3, "peak {} exceeded concurrency", engine.peak());
    }

    #[tokio::test]
    async fn test_input_order_preserved_despite_completion_order() {
        let engine = Arc::new(
            ScriptedEngine::new(|prompt, _| Ok(format!("1. answer-{}", user_index(prompt))))
                .with_delay(|prompt| Duration::from_millis(40 - 5 * user_index(prompt) as u64)),
        );
        let orchestrator = QueryOrchestrator::new(engine, config(1, 8, 8));
        let (records, _) = orchestrator.run(users(6), &CandidateLists::default()).await;

        let ids: Vec<&str> = records.iter().map(|r| r.entry.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u0", "u1", "u2", "u3", "u4", "u5"]);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.predicted_items, vec![format!("answer-{i}")]);
        }
    }

    #[tokio::test]
    async fn test_hybrid_prompt_carries_user_candidates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_engine = seen.clone();
        let engine = Arc::new(ScriptedEngine::new(move |prompt, _| {
            seen_by_engine.lock().unwrap().push(prompt.to_string());
            Ok("1. Zeta".into())
        }));
        let candidates = CandidateLists::new(HashMap::from([(
            "u0".to_string(),
            vec!["Zeta".to_string(), "Alpha".to_string()],
        )]));
        let config = OrchestratorConfig {
            mode: QueryMode::Hybrid,
            ..config(1, 20, 10)
        };
        let orchestrator = QueryOrchestrator::new(engine, config);
        orchestrator.run(users(1), &candidates).await;

        let prompts = seen.lock().unwrap();
        assert!(prompts[0].contains("1. Zeta\n2. Alpha"));
    }

    #[tokio::test]
    async fn test_custom_prompt_template() {
        struct TitleOnly;
        impl PromptTemplate for TitleOnly {
            fn render(&self, entry: &SequenceEntry, _: &[String], k: usize) -> String {
                format!("top-{k} after {}", entry.history.join(", "))
            }
        }

        let engine = Arc::new(ScriptedEngine::new(|prompt, _| {
            if prompt == "top-1 after hist-0" {
                Ok("1. match".into())
            } else {
                Ok(String::new())
            }
        }));
        let orchestrator =
            QueryOrchestrator::new(engine, config(1, 20, 10)).with_prompt(Arc::new(TitleOnly));
        let (records, _) = orchestrator.run(users(1), &CandidateLists::default()).await;
        assert_eq!(records[0].predicted_items, vec!["match"]);
    }

    #[tokio::test]
    async fn test_zero_attempts_gives_placeholders_without_queries() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok("1. A".into())));
        let config = OrchestratorConfig {
            max_retries: 0,
            ..config(2, 20, 10)
        };
        let orchestrator = QueryOrchestrator::new(engine.clone(), config);
        let (records, summary) = orchestrator.run(users(2), &CandidateLists::default()).await;

        assert_eq!(engine.total_calls(), 0);
        assert!(records.iter().all(|r| r.predicted_items == vec!["UNKNOWN"; 2]));
        assert_eq!(summary.exhausted, 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let engine = Arc::new(ScriptedEngine::new(|_, _| Ok(String::new())));
        let orchestrator = QueryOrchestrator::new(engine, config(3, 20, 10));
        let (records, summary) = orchestrator.run(Vec::new(), &CandidateLists::default()).await;
        assert!(records.is_empty());
        assert_eq!(summary.batches, 0);
        assert_eq!(summary.users, 0);
    }
}

//! Ranking prompt templates.

use crate::dataset::SequenceEntry;
use crate::rag::QueryMode;
use std::fmt::Write;

/// Builds the per-user ranking prompt.
pub trait PromptTemplate: Send + Sync {
    fn render(&self, entry: &SequenceEntry, candidates: &[String], k: usize) -> String;
}

/// The default next-purchase ranking prompt.
///
/// In `coldrag` mode only the history is given and the engine is expected to
/// supply candidates through retrieval. In `hybrid` mode every candidate is
/// listed, numbered, in its stored order.
#[derive(Debug, Clone)]
pub struct RankingPrompt {
    mode: QueryMode,
    history_window: usize,
}

impl RankingPrompt {
    pub fn new(mode: QueryMode, history_window: usize) -> Self {
        Self {
            mode,
            history_window,
        }
    }
}

/// Render titles as a numbered list, `1. <title>` per line.
pub fn numbered_list(items: &[String]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{}. {}", i + 1, item);
    }
    out
}

fn history_literal(history: &[String]) -> String {
    // Rendered as a bracketed, quoted list; the model sees titles verbatim.
    serde_json::to_string(history).unwrap_or_else(|_| history.join(", "))
}

impl PromptTemplate for RankingPrompt {
    fn render(&self, entry: &SequenceEntry, candidates: &[String], k: usize) -> String {
        let history = history_literal(entry.recent_history(self.history_window));
        let mut prompt = format!(
            "I've purchased the following products in the past in order:\n{history}\n\n"
        );
        if self.mode.includes_candidates() {
            let _ = write!(
                prompt,
                "Now there are {} candidate products that I can consider purchasing next:\n{}\n\n",
                candidates.len(),
                numbered_list(candidates)
            );
        }
        let _ = write!(
            prompt,
            "Please carefully recommend top-{k} products among the candidate products by how likely \
             I am to purchase them next, based on my past purchasing history.\n\
             Think step by step, but only output the final ranking in the following format:\n\n\
             1. <product name>\n2. <product name>\n...\n\n\
             Only include items from the given candidate list. Do not add explanations or any other text."
        );
        prompt
    }
}

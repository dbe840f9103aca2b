//! Vector index contract and the passages it returns.


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::config::RetrievalConfig;
use crate::ingest::RetrievableRecord;

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MIN_SCORE: f32 = 0.35;

const CONTEXT_DELIMITER: &str = "---------------------";

/// One search hit. Lives for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub source_id: String,
    pub page_number: Option<u32>,
    pub content: String,
    /// Similarity in [0, 1], higher is closer
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RetrievedPassage {
    /// Short provenance label, e.g. `policy.pdf p.2`
    #[inline]
    pub fn locator(&self) -> String {
        match self.page_number {
            Some(page) => format!("{} p.{}", self.source_id, page),
            None => self.source_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for SearchSettings {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl From<&RetrievalConfig> for SearchSettings {
    #[inline]
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_score: config.min_score,
        }
    }
}

/// Similarity store over embedded records
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// At most `top_k` passages scoring at least `min_score`, best first
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> crate::Result<Vec<RetrievedPassage>>;

    /// Insert or replace records by id. Every page previously stored for a
    /// source file in `records` is replaced. Returns how many were written.
    async fn upsert(&self, records: &[RetrievableRecord]) -> crate::Result<usize>;
}

/// Render passages as the delimited context block appended to the user turn
#[inline]
pub fn render_context(passages: &[RetrievedPassage]) -> String {
    let mut block = format!(
        "Context information is below, surrounded by {}\n\n{}\n",
        CONTEXT_DELIMITER, CONTEXT_DELIMITER
    );
    for (i, passage) in passages.iter().enumerate() {
        if i > 0 {
            block.push('\n');
        }
        let _ = writeln!(block, "[{}] {}", i + 1, passage.locator());
        let _ = writeln!(block, "{}", passage.content);
    }
    let _ = write!(
        block,
        "{}\n\nGiven the context and provided history information and not prior knowledge, \
         reply to the user comment. If the answer is not in the context, inform the user \
         that you can't answer the question.",
        CONTEXT_DELIMITER
    );
    block
}

/// Passage bodies joined by newlines, as shown to the evaluator
#[inline]
pub fn passages_text(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

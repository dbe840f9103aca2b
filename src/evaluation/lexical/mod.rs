//! Offline judge based on token overlap.
//!
//! Groundedness is the share of the answer's content words (ignoring words
//! it merely repeats from the question) that appear in the retrieved
//! context. Relevance is the share of the question's content words the
//! answer addresses. Numbers carry double weight in both shares.


use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashSet;

use super::{
    EvaluationFault, EvaluationRequest, EvaluationThresholds, EvaluationVerdict, Evaluator,
    PiiDetector,
};

const STOPWORDS: &[&str] = &[
    "about", "according", "also", "and", "any", "are", "as", "available", "based", "be", "but",
    "by", "can", "could", "did", "does", "for", "from", "has", "have", "how", "into", "its", "may",
    "more", "not", "of", "on", "or", "our", "per", "please", "provide", "referenced", "reference",
    "references", "should", "than", "that", "the", "their", "then", "there", "these", "this",
    "those", "through", "was", "were", "what", "when", "where", "which", "who", "why", "will",
    "with", "within", "would", "you", "your",
];

pub struct LexicalEvaluator {
    thresholds: EvaluationThresholds,
    pii: PiiDetector,
}

impl LexicalEvaluator {
    #[inline]
    pub fn new(thresholds: EvaluationThresholds) -> Self {
        Self {
            thresholds,
            pii: PiiDetector,
        }
    }
}

impl Default for LexicalEvaluator {
    #[inline]
    fn default() -> Self {
        Self::new(EvaluationThresholds::default())
    }
}

fn normalize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() > 4 {
        for suffix in ["ing", "ed", "es", "s"] {
            if let Some(stem) = lower.strip_suffix(suffix) {
                return stem.to_string();
            }
        }
    }
    lower
}

/// Content terms of `text`, normalised and deduplicated in order of appearance
pub(crate) fn content_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .filter(|w| w.chars().all(|c| c.is_ascii_digit()) || w.chars().count() > 2)
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .map(normalize)
        .unique()
        .collect()
}

fn weight(term: &str) -> f32 {
    if term.chars().all(|c| c.is_ascii_digit()) {
        2.0
    } else {
        1.0
    }
}

/// Weighted share of `terms` found in `reference`; `None` when `terms` is empty
fn coverage(terms: &[&String], reference: &HashSet<String>) -> Option<f32> {
    let total: f32 = terms.iter().map(|t| weight(t)).sum();
    if total == 0.0 {
        return None;
    }
    let covered: f32 = terms
        .iter()
        .filter(|t| reference.contains(t.as_str()))
        .map(|t| weight(t))
        .sum();
    Some(covered / total)
}

#[async_trait]
impl Evaluator for LexicalEvaluator {
    #[inline]
    fn name(&self) -> &str {
        "lexical"
    }

    #[inline]
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationVerdict, EvaluationFault> {
        let answer_terms = content_terms(&request.answer);
        if answer_terms.is_empty() {
            return Ok(EvaluationVerdict::failing("Response has no content."));
        }

        let query_terms: HashSet<String> = content_terms(&request.query).into_iter().collect();
        let context_terms: HashSet<String> = request
            .context
            .iter()
            .flat_map(|p| content_terms(&p.content))
            .collect();
        let answer_set: HashSet<String> = answer_terms.iter().cloned().collect();

        let claims: Vec<&String> = answer_terms
            .iter()
            .filter(|t| !query_terms.contains(t.as_str()))
            .collect();
        // An answer that only restates the question makes no claims to check
        let grounded = coverage(&claims, &context_terms).unwrap_or(1.0);

        let asked: Vec<&String> = query_terms.iter().collect();
        let direct = coverage(&asked, &answer_set).unwrap_or(1.0);
        // Answers that use the vocabulary of the passages the question hit
        // address the question even without repeating its words
        let topical = if context_terms.iter().any(|t| query_terms.contains(t)) {
            coverage(&claims, &context_terms).unwrap_or(0.0)
        } else {
            0.0
        };
        let relevance = direct.max(topical);

        let unsupported = claims
            .iter()
            .filter(|t| !context_terms.contains(t.as_str()))
            .take(5)
            .join(", ");
        let feedback = if unsupported.is_empty() {
            "All answer terms appear in the context.".to_string()
        } else {
            format!("Terms not found in context: {}.", unsupported)
        };

        Ok(self.thresholds.verdict(
            grounded,
            relevance,
            self.pii.contains_pii(&request.answer),
            feedback,
        ))
    }
}

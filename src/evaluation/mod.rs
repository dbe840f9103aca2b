//! Answer evaluation: the evaluator contract, verdicts and the shared
//! groundedness/relevance scoring rule.

#[cfg(test)]
mod tests;

pub mod judge;
pub mod lexical;
pub mod pii;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EvaluationConfig;
use crate::model::ModelError;
use crate::retrieval::RetrievedPassage;

pub use judge::GroundedRelevantEvaluator;
pub use lexical::LexicalEvaluator;
pub use pii::PiiDetector;

/// Appended to feedback when personal or payment data is found
pub const PII_MARKER: &str = "PII";
/// Feedback of the verdict substituted for a failed evaluator call
pub const EVALUATOR_EXCEPTION: &str = "evaluator-exception";

/// What the evaluator sees: the original question, the exact passages the
/// model was given and the draft answer
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub query: String,
    pub context: Arc<[RetrievedPassage]>,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub pass: bool,
    /// Overall score in [0, 1]
    pub score: f32,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounded: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
}

impl EvaluationVerdict {
    /// A failing verdict with score 0
    #[inline]
    pub fn failing(feedback: impl Into<String>) -> Self {
        Self {
            pass: false,
            score: 0.0,
            feedback: feedback.into(),
            grounded: None,
            relevance: None,
        }
    }

    /// The verdict recorded when the evaluator itself could not produce one
    #[inline]
    pub fn evaluator_fault(fault: &EvaluationFault) -> Self {
        Self::failing(format!("{}: {}", EVALUATOR_EXCEPTION, fault))
    }

    #[inline]
    pub fn is_evaluator_fault(&self) -> bool {
        self.feedback.starts_with(EVALUATOR_EXCEPTION)
    }
}

impl fmt::Display for EvaluationVerdict {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score {:.2}",
            if self.pass { "passed" } else { "failed" },
            self.score
        )?;
        if let (Some(grounded), Some(relevance)) = (self.grounded, self.relevance) {
            write!(
                f,
                ", grounded {:.2}, relevance {:.2}",
                grounded, relevance
            )?;
        }
        write!(f, "): {}", self.feedback)
    }
}

#[derive(Debug, Error)]
pub enum EvaluationFault {
    #[error("judge call failed: {0}")]
    Judge(#[from] ModelError),
    #[error("judge returned an unusable verdict: {0}")]
    Unparsable(String),
}

/// Pass thresholds for the combined score and the relevance component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationThresholds {
    pub score: f32,
    pub relevance: f32,
}

impl Default for EvaluationThresholds {
    #[inline]
    fn default() -> Self {
        Self {
            score: 0.7,
            relevance: 0.6,
        }
    }
}

impl From<&EvaluationConfig> for EvaluationThresholds {
    #[inline]
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            score: config.score_threshold,
            relevance: config.relevance_threshold,
        }
    }
}

impl EvaluationThresholds {
    /// Combine dimension scores into a verdict.
    ///
    /// `score = 0.5 * grounded + 0.5 * relevance`, where `grounded` is
    /// halved when PII was detected. Passing needs both the score and the
    /// relevance floor. Inputs are clamped to [0, 1] and the score is
    /// rounded to four decimals so threshold comparisons are stable.
    #[inline]
    pub fn verdict(
        &self,
        grounded: f32,
        relevance: f32,
        pii_detected: bool,
        feedback: impl Into<String>,
    ) -> EvaluationVerdict {
        let mut grounded = clamp_unit(grounded);
        let relevance = clamp_unit(relevance);
        let mut feedback = feedback.into();

        if pii_detected {
            grounded *= 0.5;
            if !feedback.contains(PII_MARKER) {
                if feedback.is_empty() {
                    feedback.push_str(PII_MARKER);
                } else {
                    feedback = format!("{} {}", feedback.trim_end(), PII_MARKER);
                }
            }
        }

        let score = round4(0.5 * grounded + 0.5 * relevance);
        EvaluationVerdict {
            pass: score >= self.score && relevance >= self.relevance,
            score,
            feedback,
            grounded: Some(grounded),
            relevance: Some(relevance),
        }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

/// Judges a draft answer against the question and the retrieved context
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationVerdict, EvaluationFault>;
}

//! Evaluation-gated retry controller.
//!
//! Each attempt invokes the rest of the chain once and judges the draft.
//! A failing draft is retried with the original request plus
//! [`CORRECTIVE_SUFFIX`] until `max_attempts` drafts have been produced;
//! the last draft is then returned with a failed summary rather than
//! withheld. Tool-call drafts end the loop unjudged.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ChainContext, ChainResponse, EvaluationSummary, Next, PipelineError, Stage};
use crate::evaluation::{EvaluationRequest, EvaluationVerdict, Evaluator};
use crate::model::ModelInvocationRequest;

pub const EVALUATION_ORDER: i32 = 40;

pub const CORRECTIVE_SUFFIX: &str = "Your previous answer was not grounded in the provided documents.
Relevance to the given context has failed.
Please stick to the given context for response.
Please recheck the context and regenerate response with references.";

const NO_RESPONSE_FEEDBACK: &str = "No response text to evaluate.";

pub struct EvaluationAdvisor {
    evaluator: Arc<dyn Evaluator>,
    max_attempts: u32,
    order: i32,
}

impl EvaluationAdvisor {
    /// `max_attempts` bounds the number of drafts; 0 disables evaluation
    #[inline]
    pub fn new(evaluator: Arc<dyn Evaluator>, max_attempts: u32) -> Self {
        Self {
            evaluator,
            max_attempts,
            order: EVALUATION_ORDER,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_order(self, order: i32) -> Self {
        Self { order, ..self }
    }

    #[inline]
    pub fn order(&self) -> i32 {
        self.order
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub(crate) async fn around(
        &self,
        request: ModelInvocationRequest,
        ctx: &ChainContext,
        next: Next<'_>,
    ) -> Result<ChainResponse, PipelineError> {
        if self.max_attempts == 0 {
            return next.call(request, ctx).await;
        }

        let original = request;
        let mut current = original.clone();
        let mut attempt = 0;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(PipelineError::cancelled(Stage::Evaluation));
            }
            attempt += 1;

            let mut response = next.call(current, ctx).await?;

            if response.result.tool_call {
                debug!("Attempt {} requested a tool call; skipping evaluation", attempt);
                response.evaluation = EvaluationSummary::Skipped { attempts: attempt };
                return Ok(response);
            }

            let verdict = match response
                .result
                .text
                .as_deref()
                .filter(|text| !text.trim().is_empty())
            {
                Some(answer) => {
                    let request = EvaluationRequest {
                        query: original.question.clone(),
                        context: Arc::clone(&response.retrieved),
                        answer: answer.to_string(),
                    };
                    self.judge(&request, ctx).await?
                }
                None => EvaluationVerdict::failing(NO_RESPONSE_FEEDBACK),
            };

            if verdict.pass {
                info!(
                    "Answer passed evaluation on attempt {} (score {:.2})",
                    attempt, verdict.score
                );
                response.evaluation = EvaluationSummary::Passed {
                    verdict,
                    attempts: attempt,
                };
                return Ok(response);
            }

            if attempt >= self.max_attempts {
                warn!(
                    "Answer failed evaluation after {} attempts (score {:.2}): {}. Returning last draft",
                    attempt, verdict.score, verdict.feedback
                );
                response.evaluation = EvaluationSummary::Failed {
                    verdict,
                    attempts: attempt,
                };
                return Ok(response);
            }

            warn!(
                "Answer failed evaluation on attempt {} (score {:.2}): {}. {} attempt(s) left",
                attempt,
                verdict.score,
                verdict.feedback,
                self.max_attempts - attempt
            );
            current = original.augmented(CORRECTIVE_SUFFIX);
        }
    }

    async fn judge(
        &self,
        request: &EvaluationRequest,
        ctx: &ChainContext,
    ) -> Result<EvaluationVerdict, PipelineError> {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(PipelineError::cancelled(Stage::Evaluation)),
            outcome = self.evaluator.evaluate(request) => Ok(outcome.unwrap_or_else(|fault| {
                error!("Evaluator {} failed: {}", self.evaluator.name(), fault);
                EvaluationVerdict::evaluator_fault(&fault)
            })),
        }
    }
}

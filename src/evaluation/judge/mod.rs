//! LLM judge scoring groundedness and relevance.


use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    EvaluationFault, EvaluationRequest, EvaluationThresholds, EvaluationVerdict, Evaluator,
    PiiDetector,
};
use crate::model::{ModelGateway, ModelInvocationRequest, parse_json_payload};
use crate::retrieval::passages_text;


const JUDGE_INSTRUCTIONS: &str = "You grade answers produced by a document question-answering \
assistant. Reply with JSON only.";

/// Judge prompt; `{query}`, `{response}` and `{context}` are substituted
const JUDGE_TEMPLATE: &str = "Score the Response on two independent dimensions.

1) grounded_score: 1.0 when every factual claim in the Response is supported by the Context. \
Lower it for each unsupported or contradicted claim.
2) relevance_score: 1.0 when the Response directly and usefully answers the Query. \
Lower it for off-topic, partial or missing answers.

Also report:
- pii_detected: true when the Response contains personal or payment card data.
- feedback: one short sentence naming the main problem, if any.

Query:
{query}

Response:
{response}

Context:
{context}";

#[derive(Debug, Deserialize)]
struct JudgeScores {
    grounded_score: f32,
    relevance_score: f32,
    #[serde(default)]
    pii_detected: bool,
    #[serde(default)]
    feedback: String,
}

/// Asks a judge model for dimension scores and applies the verdict rule
/// locally, so the pass decision never depends on the judge's arithmetic.
pub struct GroundedRelevantEvaluator {
    gateway: Arc<dyn ModelGateway>,
    thresholds: EvaluationThresholds,
    pii: PiiDetector,
}

impl GroundedRelevantEvaluator {
    #[inline]
    pub fn new(gateway: Arc<dyn ModelGateway>, thresholds: EvaluationThresholds) -> Self {
        Self {
            gateway,
            thresholds,
            pii: PiiDetector,
        }
    }

    fn build_prompt(request: &EvaluationRequest) -> String {
        JUDGE_TEMPLATE
            .replace("{query}", &request.query)
            .replace("{response}", &request.answer)
            .replace("{context}", &passages_text(&request.context))
    }

    fn output_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "grounded_score": { "type": "number" },
                "relevance_score": { "type": "number" },
                "pii_detected": { "type": "boolean" },
                "feedback": { "type": "string" }
            },
            "required": ["grounded_score", "relevance_score", "pii_detected", "feedback"]
        })
    }

    fn parse_scores(payload: Option<Value>) -> Result<JudgeScores, EvaluationFault> {
        let payload =
            payload.ok_or_else(|| EvaluationFault::Unparsable("empty judge reply".to_string()))?;
        serde_json::from_value(payload).map_err(|e| EvaluationFault::Unparsable(e.to_string()))
    }
}

#[async_trait]
impl Evaluator for GroundedRelevantEvaluator {
    #[inline]
    fn name(&self) -> &str {
        "grounded-relevant"
    }

    #[inline]
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationVerdict, EvaluationFault> {
        let judge_request = ModelInvocationRequest::new(Self::build_prompt(request))
            .with_system_instructions(JUDGE_INSTRUCTIONS)
            .with_output_schema(Self::output_schema());

        let result = match self.gateway.invoke(&judge_request).await {
            Ok(result) => result,
            Err(e) => {
                error!("Evaluation judge call failed: {}", e);
                return Ok(EvaluationVerdict::evaluator_fault(&EvaluationFault::Judge(
                    e,
                )));
            }
        };

        let payload = result
            .structured
            .or_else(|| result.text.as_deref().and_then(parse_json_payload));
        let scores = match Self::parse_scores(payload) {
            Ok(scores) => scores,
            Err(e) => {
                warn!("Judge returned an invalid evaluation: {}", e);
                return Ok(EvaluationVerdict::evaluator_fault(&e));
            }
        };

        let pii_detected = scores.pii_detected || self.pii.contains_pii(&request.answer);
        let verdict = self.thresholds.verdict(
            scores.grounded_score,
            scores.relevance_score,
            pii_detected,
            scores.feedback,
        );
        debug!(
            "Judge verdict: pass={}, score={:.2}, feedback={}",
            verdict.pass, verdict.score, verdict.feedback
        );
        Ok(verdict)
    }
}

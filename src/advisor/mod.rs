//! Ordered interceptor chain around one "answer this question" call.
//!
//! Advisors are plain tagged variants with an explicit order. Lower orders
//! sit further out: they see the request first and the response last.
//! Equal orders keep their registration order. The innermost link invokes
//! the model gateway.
//!
//! ```text
//! retrieval(10) -> memory(20) -> logger(30) -> evaluation(40) -> gateway
//! ```


pub mod evaluation;
pub mod logger;
pub mod memory;
pub mod retrieval;

use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::evaluation::EvaluationVerdict;
use crate::model::{ModelError, ModelGateway, ModelInvocationRequest, ModelInvocationResult};
use crate::retrieval::RetrievedPassage;

pub use evaluation::{CORRECTIVE_SUFFIX, EvaluationAdvisor};
pub use logger::LoggerAdvisor;
pub use memory::MemoryAdvisor;
pub use retrieval::RetrievalAdvisor;

/// Identifies where in the chain a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Retrieval,
    Memory,
    Logger,
    Evaluation,
    ModelGateway,
}

impl Stage {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Memory => "memory",
            Self::Logger => "logger",
            Self::Evaluation => "evaluation",
            Self::ModelGateway => "model-gateway",
        }
    }
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineErrorKind {
    #[error(transparent)]
    Model(#[from] ModelError),
    /// A vector index or conversation store call failed
    #[error("{0}")]
    Collaborator(String),
    #[error("request cancelled")]
    Cancelled,
}

/// The chain aborted before producing an answer
#[derive(Debug, Error)]
#[error("{stage} stage failed: {kind}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub kind: PipelineErrorKind,
}

impl PipelineError {
    #[inline]
    pub fn new(stage: Stage, kind: impl Into<PipelineErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    #[inline]
    pub fn collaborator(stage: Stage, error: impl fmt::Display) -> Self {
        Self::new(stage, PipelineErrorKind::Collaborator(error.to_string()))
    }

    #[inline]
    pub fn cancelled(stage: Stage) -> Self {
        Self::new(stage, PipelineErrorKind::Cancelled)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.kind,
            PipelineErrorKind::Cancelled | PipelineErrorKind::Model(ModelError::Cancelled)
        )
    }
}

/// How the evaluation-gated retry controller concluded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationSummary {
    /// No controller in the chain, or one configured with zero attempts
    Disabled,
    /// The model asked for a tool call; drafts like that are never judged
    Skipped { attempts: u32 },
    Passed {
        verdict: EvaluationVerdict,
        attempts: u32,
    },
    /// Attempts ran out; the last draft is returned unvalidated
    Failed {
        verdict: EvaluationVerdict,
        attempts: u32,
    },
}

impl EvaluationSummary {
    #[inline]
    pub fn verdict(&self) -> Option<&EvaluationVerdict> {
        match self {
            Self::Passed { verdict, .. } | Self::Failed { verdict, .. } => Some(verdict),
            Self::Disabled | Self::Skipped { .. } => None,
        }
    }

    #[inline]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Skipped { attempts }
            | Self::Passed { attempts, .. }
            | Self::Failed { attempts, .. } => Some(*attempts),
            Self::Disabled => None,
        }
    }

    /// The answer failed validation and is returned best-effort
    #[inline]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for EvaluationSummary {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("not evaluated (evaluation disabled)"),
            Self::Skipped { .. } => f.write_str("not evaluated (tool call)"),
            Self::Passed { verdict, attempts } => {
                write!(f, "{} after {} attempt(s)", verdict, attempts)
            }
            Self::Failed { verdict, attempts } => write!(
                f,
                "{} after {} attempt(s); the answer could not be validated",
                verdict, attempts
            ),
        }
    }
}

/// Per-request state shared by every advisor
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    pub conversation_id: Option<String>,
    pub cancel: CancellationToken,
}

impl ChainContext {
    #[inline]
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            cancel: CancellationToken::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_cancel(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }
}

#[derive(Debug, Clone)]
pub struct ChainResponse {
    pub result: ModelInvocationResult,
    /// The passages the returned draft was generated from
    pub retrieved: Arc<[RetrievedPassage]>,
    pub evaluation: EvaluationSummary,
}

pub enum Advisor {
    Retrieval(RetrievalAdvisor),
    Memory(MemoryAdvisor),
    Logger(LoggerAdvisor),
    Evaluation(EvaluationAdvisor),
}

impl Advisor {
    #[inline]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Retrieval(_) => Stage::Retrieval,
            Self::Memory(_) => Stage::Memory,
            Self::Logger(_) => Stage::Logger,
            Self::Evaluation(_) => Stage::Evaluation,
        }
    }

    #[inline]
    pub fn order(&self) -> i32 {
        match self {
            Self::Retrieval(a) => a.order(),
            Self::Memory(a) => a.order(),
            Self::Logger(a) => a.order(),
            Self::Evaluation(a) => a.order(),
        }
    }

    fn around<'a>(
        &'a self,
        request: ModelInvocationRequest,
        ctx: &'a ChainContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ChainResponse, PipelineError>> {
        match self {
            Self::Retrieval(a) => Box::pin(a.around(request, ctx, next)),
            Self::Memory(a) => Box::pin(a.around(request, ctx, next)),
            Self::Logger(a) => Box::pin(a.around(request, ctx, next)),
            Self::Evaluation(a) => Box::pin(a.around(request, ctx, next)),
        }
    }
}

impl From<RetrievalAdvisor> for Advisor {
    #[inline]
    fn from(advisor: RetrievalAdvisor) -> Self {
        Self::Retrieval(advisor)
    }
}

impl From<MemoryAdvisor> for Advisor {
    #[inline]
    fn from(advisor: MemoryAdvisor) -> Self {
        Self::Memory(advisor)
    }
}

impl From<LoggerAdvisor> for Advisor {
    #[inline]
    fn from(advisor: LoggerAdvisor) -> Self {
        Self::Logger(advisor)
    }
}

impl From<EvaluationAdvisor> for Advisor {
    #[inline]
    fn from(advisor: EvaluationAdvisor) -> Self {
        Self::Evaluation(advisor)
    }
}

/// The remainder of the chain below the current advisor
#[derive(Clone, Copy)]
pub struct Next<'a> {
    advisors: &'a [Advisor],
    gateway: &'a dyn ModelGateway,
}

impl<'a> Next<'a> {
    #[inline]
    pub fn model_name(&self) -> &'a str {
        self.gateway.model_name()
    }

    /// Run the rest of the chain. May be called more than once.
    #[inline]
    pub fn call(
        self,
        request: ModelInvocationRequest,
        ctx: &'a ChainContext,
    ) -> BoxFuture<'a, Result<ChainResponse, PipelineError>> {
        match self.advisors.split_first() {
            Some((advisor, rest)) => advisor.around(
                request,
                ctx,
                Next {
                    advisors: rest,
                    gateway: self.gateway,
                },
            ),
            None => Box::pin(invoke_gateway(self.gateway, request, ctx)),
        }
    }
}

async fn invoke_gateway(
    gateway: &dyn ModelGateway,
    request: ModelInvocationRequest,
    ctx: &ChainContext,
) -> Result<ChainResponse, PipelineError> {
    if ctx.cancel.is_cancelled() {
        return Err(PipelineError::cancelled(Stage::ModelGateway));
    }
    let result = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            return Err(PipelineError::cancelled(Stage::ModelGateway));
        }
        result = gateway.invoke(&request) => {
            result.map_err(|e| PipelineError::new(Stage::ModelGateway, e))?
        }
    };
    Ok(ChainResponse {
        result,
        retrieved: Arc::clone(&request.context),
        evaluation: EvaluationSummary::Disabled,
    })
}

pub struct AdvisorChain {
    advisors: Vec<Advisor>,
    gateway: Arc<dyn ModelGateway>,
}

impl AdvisorChain {
    #[inline]
    pub fn builder(gateway: Arc<dyn ModelGateway>) -> AdvisorChainBuilder {
        AdvisorChainBuilder {
            gateway,
            advisors: Vec::new(),
        }
    }

    /// Stages in execution order, outermost first
    #[inline]
    pub fn stages(&self) -> Vec<Stage> {
        self.advisors.iter().map(Advisor::stage).collect()
    }

    #[inline]
    pub async fn call(
        &self,
        request: ModelInvocationRequest,
        ctx: &ChainContext,
    ) -> Result<ChainResponse, PipelineError> {
        Next {
            advisors: &self.advisors,
            gateway: self.gateway.as_ref(),
        }
        .call(request, ctx)
        .await
    }
}

pub struct AdvisorChainBuilder {
    gateway: Arc<dyn ModelGateway>,
    advisors: Vec<Advisor>,
}

impl AdvisorChainBuilder {
    #[inline]
    #[must_use]
    pub fn with(mut self, advisor: impl Into<Advisor>) -> Self {
        self.advisors.push(advisor.into());
        self
    }

    #[inline]
    pub fn build(mut self) -> AdvisorChain {
        // Stable: ties keep registration order
        self.advisors.sort_by_key(Advisor::order);
        AdvisorChain {
            advisors: self.advisors,
            gateway: self.gateway,
        }
    }
}

use std::sync::Arc;
use tracing::debug;

use super::{ChainContext, ChainResponse, Next, PipelineError, Stage};
use crate::model::ModelInvocationRequest;
use crate::retrieval::{SearchSettings, VectorIndex};

pub const RETRIEVAL_ORDER: i32 = 10;

/// Searches the vector index with the caller's question and attaches the
/// hits as the request context. The same passages travel on to the
/// evaluator through [`ChainResponse::retrieved`]; nothing is re-queried.
pub struct RetrievalAdvisor {
    index: Arc<dyn VectorIndex>,
    settings: SearchSettings,
    order: i32,
}

impl RetrievalAdvisor {
    #[inline]
    pub fn new(index: Arc<dyn VectorIndex>, settings: SearchSettings) -> Self {
        Self {
            index,
            settings,
            order: RETRIEVAL_ORDER,
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

    pub(crate) async fn around(
        &self,
        request: ModelInvocationRequest,
        ctx: &ChainContext,
        next: Next<'_>,
    ) -> Result<ChainResponse, PipelineError> {
        let search = self.index.search(
            &request.question,
            self.settings.top_k,
            self.settings.min_score,
        );
        let passages = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(PipelineError::cancelled(Stage::Retrieval)),
            found = search => found.map_err(|e| PipelineError::collaborator(Stage::Retrieval, e))?,
        };

        debug!(
            "Retrieved {} passages (top_k={}, min_score={})",
            passages.len(),
            self.settings.top_k,
            self.settings.min_score
        );

        next.call(request.with_context(passages), ctx).await
    }
}

use tracing::info;

use super::{ChainContext, ChainResponse, Next, PipelineError};
use crate::model::ModelInvocationRequest;

pub const LOGGER_ORDER: i32 = 30;

pub struct LoggerAdvisor {
    order: i32,
}

impl Default for LoggerAdvisor {
    #[inline]
    fn default() -> Self {
        Self {
            order: LOGGER_ORDER,
        }
    }
}

impl LoggerAdvisor {
    #[inline]
    #[must_use]
    pub fn with_order(self, order: i32) -> Self {
        Self { order }
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
        info!(
            "Chat request: model={}, conversation={}, prior_messages={}, context_passages={}",
            next.model_name(),
            ctx.conversation_id.as_deref().unwrap_or("-"),
            request.prior_messages.len(),
            request.context.len()
        );

        let response = next.call(request, ctx).await?;

        match &response.result.usage {
            Some(usage) => info!("{}", usage.summary()),
            None => info!("No usage metadata found."),
        }

        Ok(response)
    }
}

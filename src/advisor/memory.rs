use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::{ChainContext, ChainResponse, Next, PipelineError, Stage};
use crate::model::{Message, ModelInvocationRequest};
use crate::memory::ConversationStore;

pub const MEMORY_ORDER: i32 = 20;

/// Prepends the stored conversation to the request and, once the rest of
/// the chain has produced an answer, records the question and that answer.
///
/// Rejected drafts never reach the store: the append happens once, after
/// the retry controller below has settled. Nothing is written on error, or
/// when the final draft is a tool call or carries no text.
pub struct MemoryAdvisor {
    store: Arc<dyn ConversationStore>,
    order: i32,
}

impl MemoryAdvisor {
    #[inline]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            order: MEMORY_ORDER,
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
        let Some(conversation_id) = ctx.conversation_id.as_deref() else {
            debug!("No conversation id; skipping memory");
            return next.call(request, ctx).await;
        };

        let history = self
            .store
            .read(conversation_id)
            .await
            .map_err(|e| PipelineError::collaborator(Stage::Memory, e))?;
        debug!(
            "Loaded {} prior messages for conversation {}",
            history.len(),
            conversation_id
        );

        let question = request.question.clone();
        let mut prior = history;
        prior.extend(request.prior_messages.iter().cloned());
        let response = next.call(request.with_prior_messages(prior), ctx).await?;

        if response.result.tool_call || response.result.text().trim().is_empty() {
            debug!(
                "Final draft for conversation {} has no answer text; not recording the turn",
                conversation_id
            );
            return Ok(response);
        }

        let mut answer = Message::assistant(response.result.text());
        if !response.retrieved.is_empty() {
            answer = answer.with_metadata(source_metadata(&response));
        }
        self.store
            .append_turn(conversation_id, Message::user(question), answer)
            .await
            .map_err(|e| PipelineError::collaborator(Stage::Memory, e))?;

        Ok(response)
    }
}

fn source_metadata(response: &ChainResponse) -> Value {
    let sources: Vec<Value> = response
        .retrieved
        .iter()
        .map(|p| {
            json!({
                "source_id": p.source_id,
                "page_number": p.page_number,
                "score": p.score,
            })
        })
        .collect();
    json!({ "sources": sources })
}

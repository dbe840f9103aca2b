//! Caller-facing operations: answer, history, clear and ingest.

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::advisor::{
    AdvisorChain, ChainContext, EvaluationAdvisor, EvaluationSummary, LoggerAdvisor,
    MemoryAdvisor, RetrievalAdvisor,
};
use crate::config::{Config, JudgeKind, MemoryBackend, PromptConfig};
use crate::database::{LanceVectorIndex, SqliteConversationStore};
use crate::embeddings::OllamaClient;
use crate::evaluation::{
    EvaluationThresholds, Evaluator, GroundedRelevantEvaluator, LexicalEvaluator,
};
use crate::ingest::{IngestReport, IngestionService};
use crate::memory::{ConversationStore, InMemoryConversationStore, resolve_conversation_id};
use crate::model::{Message, ModelGateway, ModelInvocationRequest, TokenUsage, create_gateway};
use crate::retrieval::{RetrievedPassage, SearchSettings, VectorIndex};
use crate::{DocIntelError, Result};

/// What `answer` hands back to a caller
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub conversation_id: String,
    pub evaluation: EvaluationSummary,
    pub usage: Option<TokenUsage>,
    pub sources: Vec<RetrievedPassage>,
    pub tool_call: bool,
}

/// Collaborators for [`DocIntelService::new`]
pub struct ServiceComponents {
    pub chat: Arc<dyn ModelGateway>,
    pub extraction: Arc<dyn ModelGateway>,
    pub index: Arc<dyn VectorIndex>,
    pub memory: Arc<dyn ConversationStore>,
    pub evaluator: Arc<dyn Evaluator>,
}

pub struct DocIntelService {
    chain: AdvisorChain,
    memory: Arc<dyn ConversationStore>,
    ingestion: IngestionService,
    prompts: PromptConfig,
}

impl DocIntelService {
    /// Wires the query chain: retrieval, memory, logging, then the
    /// evaluation-gated retry loop closest to the model.
    #[inline]
    pub fn new(components: ServiceComponents, config: &Config) -> Self {
        let ServiceComponents {
            chat,
            extraction,
            index,
            memory,
            evaluator,
        } = components;

        let chain = AdvisorChain::builder(chat)
            .with(RetrievalAdvisor::new(
                Arc::clone(&index),
                SearchSettings::from(&config.retrieval),
            ))
            .with(MemoryAdvisor::new(Arc::clone(&memory)))
            .with(LoggerAdvisor::default())
            .with(EvaluationAdvisor::new(
                evaluator,
                config.evaluation.max_attempts,
            ))
            .build();
        debug!("Advisor chain: {:?}", chain.stages());

        Self {
            chain,
            memory,
            ingestion: IngestionService::new(extraction, index),
            prompts: config.prompts.clone(),
        }
    }

    /// Builds every collaborator from configuration
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let chat = create_gateway(&config.chat, &config.retry)?;
        let extraction = create_gateway(&config.extraction, &config.retry)?;
        let thresholds = EvaluationThresholds::from(&config.evaluation);
        let evaluator: Arc<dyn Evaluator> = match config.evaluation.judge {
            JudgeKind::Llm => Arc::new(GroundedRelevantEvaluator::new(
                create_gateway(&config.judge, &config.retry)?,
                thresholds,
            )),
            JudgeKind::Lexical => Arc::new(LexicalEvaluator::new(thresholds)),
        };

        let embedder = OllamaClient::new(&config.ollama)
            .map_err(|e| DocIntelError::Embedding(format!("{e:#}")))?;
        let index: Arc<dyn VectorIndex> = Arc::new(
            LanceVectorIndex::open(&config.vector_database_path(), Arc::new(embedder)).await?,
        );

        let memory = open_conversation_store(config).await?;

        info!(
            "DocIntel ready: chat={}, extraction={}, judge={:?}",
            chat.model_name(),
            extraction.model_name(),
            config.evaluation.judge
        );
        Ok(Self::new(
            ServiceComponents {
                chat,
                extraction,
                index,
                memory,
                evaluator,
            },
            config,
        ))
    }

    /// Answers `question` within a conversation, minting an id when none is
    /// given. An answer that never passed evaluation is still returned, with
    /// a failed summary.
    #[inline]
    pub async fn answer(
        &self,
        question: &str,
        conversation_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(DocIntelError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        let conversation_id = resolve_conversation_id(conversation_id);

        let request = ModelInvocationRequest::new(question)
            .with_user_text(self.user_text(question))
            .with_system_instructions(self.prompts.system.as_str());
        let ctx = ChainContext::new(conversation_id.as_str()).with_cancel(cancel);

        let response = self.chain.call(request, &ctx).await?;
        Ok(Answer {
            text: response.result.text().to_string(),
            conversation_id,
            evaluation: response.evaluation,
            usage: response.result.usage,
            sources: response.retrieved.to_vec(),
            tool_call: response.result.tool_call,
        })
    }

    #[inline]
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.memory.read(conversation_id).await
    }

    #[inline]
    pub async fn clear(&self, conversation_id: &str) -> Result<()> {
        self.memory.clear(conversation_id).await
    }

    #[inline]
    pub async fn ingest(
        &self,
        pdf: Vec<u8>,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        self.ingestion.ingest(pdf, file_name, cancel).await
    }

    fn user_text(&self, question: &str) -> String {
        let hint = self.prompts.reference_hint.trim();
        if hint.is_empty() {
            question.to_string()
        } else {
            format!("{question}\n{hint}")
        }
    }
}

/// The configured conversation store, without any model or index. Enough for
/// `history` and `clear`.
#[inline]
pub async fn open_conversation_store(config: &Config) -> Result<Arc<dyn ConversationStore>> {
    Ok(match config.memory.backend {
        MemoryBackend::Sqlite => Arc::new(
            SqliteConversationStore::initialize_from_config_dir(
                config.get_base_dir(),
                config.memory.max_messages,
            )
            .await?,
        ),
        MemoryBackend::Memory => {
            Arc::new(InMemoryConversationStore::new(config.memory.max_messages))
        }
    })
}

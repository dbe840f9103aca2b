use super::*;
use crate::config::JudgeKind;
use crate::ingest::RetrievableRecord;
use crate::model::testing::ScriptedGateway;
use crate::model::{ModelInvocationResult, Role};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

const QUESTION: &str = "What is the refund window?";
const GROUNDED: &str = "30 days, per the referenced policy";

#[derive(Default)]
struct PolicyIndex {
    upserted: Mutex<usize>,
}

#[async_trait]
impl VectorIndex for PolicyIndex {
    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
        _min_score: f32,
    ) -> Result<Vec<RetrievedPassage>> {
        Ok(vec![RetrievedPassage {
            source_id: "policy.pdf".to_string(),
            page_number: Some(1),
            content: "Refunds must be requested within 30 days.".to_string(),
            score: 0.9,
            metadata: serde_json::Map::new(),
        }])
    }

    async fn upsert(&self, records: &[RetrievableRecord]) -> Result<usize> {
        *self.upserted.lock().expect("lock should not be poisoned") += records.len();
        Ok(records.len())
    }
}

struct Harness {
    service: DocIntelService,
    chat: Arc<ScriptedGateway>,
    extraction: Arc<ScriptedGateway>,
    index: Arc<PolicyIndex>,
}

fn harness(answers: &[&str], extraction: ScriptedGateway) -> Harness {
    let mut config = Config::default();
    config.evaluation.judge = JudgeKind::Lexical;
    let chat = Arc::new(ScriptedGateway::answers(answers));
    let extraction = Arc::new(extraction);
    let index = Arc::new(PolicyIndex::default());
    let service = DocIntelService::new(
        ServiceComponents {
            chat: chat.clone(),
            extraction: extraction.clone(),
            index: index.clone(),
            memory: Arc::new(InMemoryConversationStore::default()),
            evaluator: Arc::new(LexicalEvaluator::default()),
        },
        &config,
    );
    Harness {
        service,
        chat,
        extraction,
        index,
    }
}

#[tokio::test]
async fn answer_retries_an_ungrounded_draft_and_records_the_turn() {
    let h = harness(
        &["14 days", "30 days, per the referenced policy"],
        ScriptedGateway::answers(&[]),
    );

    let answer = h
        .service
        .answer(QUESTION, Some("conv-1"), CancellationToken::new())
        .await
        .expect("should answer");

    assert_eq!(answer.text, "30 days, per the referenced policy");
    assert_eq!(answer.conversation_id, "conv-1");
    assert!(matches!(
        answer.evaluation,
        EvaluationSummary::Passed { attempts: 2, .. }
    ));
    assert_eq!(answer.sources.len(), 1);

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].user_text,
        format!("{QUESTION}\nProvide references wherever available.")
    );
    assert!(requests[1].user_text.ends_with(crate::advisor::CORRECTIVE_SUFFIX));
    assert!(requests[0].system_instructions.is_some());

    let history = h.service.history("conv-1").await.expect("should read");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, QUESTION);
    assert_eq!(history[1].content, "30 days, per the referenced policy");
}

#[tokio::test]
async fn unvalidated_answer_is_still_returned() {
    let h = harness(&["14 days", "about two weeks"], ScriptedGateway::answers(&[]));

    let answer = h
        .service
        .answer(QUESTION, None, CancellationToken::new())
        .await
        .expect("degraded answers are not errors");

    assert_eq!(answer.text, "about two weeks");
    assert!(answer.evaluation.is_degraded());
    assert_eq!(answer.evaluation.attempts(), Some(2));
}

#[tokio::test]
async fn missing_conversation_id_is_minted() {
    let h = harness(&[GROUNDED, GROUNDED], ScriptedGateway::answers(&[]));

    let answer = h
        .service
        .answer(QUESTION, Some("   "), CancellationToken::new())
        .await
        .expect("should answer");

    assert_eq!(answer.conversation_id.len(), 8);
    assert!(answer.conversation_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(
        h.service
            .history(&answer.conversation_id)
            .await
            .expect("should read")
            .len(),
        2
    );
}

#[tokio::test]
async fn blank_question_is_rejected_before_any_model_call() {
    let h = harness(&[GROUNDED, GROUNDED], ScriptedGateway::answers(&[]));

    let error = h
        .service
        .answer("  \n", None, CancellationToken::new())
        .await
        .expect_err("should reject");

    assert!(matches!(error, DocIntelError::InvalidRequest(_)));
    assert_eq!(h.chat.calls(), 0);
}

#[tokio::test]
async fn clear_forgets_the_conversation() {
    let h = harness(&[GROUNDED, GROUNDED], ScriptedGateway::answers(&[]));
    h.service
        .answer(QUESTION, Some("conv-2"), CancellationToken::new())
        .await
        .expect("should answer");

    h.service.clear("conv-2").await.expect("should clear");

    assert!(
        h.service
            .history("conv-2")
            .await
            .expect("should read")
            .is_empty()
    );
}

#[tokio::test]
async fn gateway_failure_names_the_stage() {
    let mut config = Config::default();
    config.evaluation.max_attempts = 1;
    let service = DocIntelService::new(
        ServiceComponents {
            chat: Arc::new(ScriptedGateway::new([Err(crate::model::ModelError::fatal(
                "bad key",
            ))])),
            extraction: Arc::new(ScriptedGateway::answers(&[])),
            index: Arc::new(PolicyIndex::default()),
            memory: Arc::new(InMemoryConversationStore::default()),
            evaluator: Arc::new(LexicalEvaluator::default()),
        },
        &config,
    );

    let error = service
        .answer(QUESTION, Some("conv-3"), CancellationToken::new())
        .await
        .expect_err("should fail");

    assert!(error.to_string().starts_with("model-gateway stage failed"));
    assert!(
        service
            .history("conv-3")
            .await
            .expect("should read")
            .is_empty()
    );
}

#[tokio::test]
async fn ingest_goes_through_the_extraction_gateway() {
    let extraction = ScriptedGateway::new([Ok(ModelInvocationResult {
        structured: Some(json!([{ "page_number": 1, "text_content": "Refunds within 30 days." }])),
        ..ModelInvocationResult::default()
    })]);
    let h = harness(&[], extraction);

    let report = h
        .service
        .ingest(b"%PDF-1.4".to_vec(), "policy.pdf", &CancellationToken::new())
        .await
        .expect("should ingest");

    assert_eq!(report.record_count, 1);
    assert_eq!(h.extraction.calls(), 1);
    assert_eq!(h.chat.calls(), 0);
    assert_eq!(
        *h.index.upserted.lock().expect("lock should not be poisoned"),
        1
    );
}

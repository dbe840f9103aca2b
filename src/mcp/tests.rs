use super::*;
use crate::config::Config;
use crate::evaluation::LexicalEvaluator;
use crate::ingest::RetrievableRecord;
use crate::mcp::protocol::{CallToolResult, JsonRpcMessage, MCP_VERSION, ToolContent, error_codes};
use crate::memory::InMemoryConversationStore;
use crate::model::ModelInvocationResult;
use crate::model::testing::ScriptedGateway;
use crate::retrieval::{RetrievedPassage, VectorIndex};
use crate::service::ServiceComponents;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::sync::Mutex;

const GROUNDED: &str = "30 days, per the referenced policy";

#[derive(Default)]
struct PolicyIndex {
    upserted: Mutex<Vec<String>>,
}

#[async_trait]
impl VectorIndex for PolicyIndex {
    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
        _min_score: f32,
    ) -> crate::Result<Vec<RetrievedPassage>> {
        Ok(vec![RetrievedPassage {
            source_id: "policy.pdf".to_string(),
            page_number: Some(2),
            content: "Refunds must be requested within 30 days.".to_string(),
            score: 0.87,
            metadata: serde_json::Map::new(),
        }])
    }

    async fn upsert(&self, records: &[RetrievableRecord]) -> crate::Result<usize> {
        self.upserted
            .lock()
            .expect("lock should not be poisoned")
            .extend(records.iter().map(|r| r.source_file_name().to_string()));
        Ok(records.len())
    }
}

fn server_with(answers: &[&str], extraction: ScriptedGateway) -> (McpServer, Arc<PolicyIndex>) {
    let index = Arc::new(PolicyIndex::default());
    let service = Arc::new(DocIntelService::new(
        ServiceComponents {
            chat: Arc::new(ScriptedGateway::answers(answers)),
            extraction: Arc::new(extraction),
            index: index.clone(),
            memory: Arc::new(InMemoryConversationStore::default()),
            evaluator: Arc::new(LexicalEvaluator::default()),
        },
        &Config::default(),
    ));
    (docintel_server(&service), index)
}

fn server() -> McpServer {
    server_with(&[GROUNDED, GROUNDED], ScriptedGateway::answers(&[])).0
}

fn one_page_extraction() -> ScriptedGateway {
    ScriptedGateway::new([Ok(ModelInvocationResult {
        structured: Some(json!([{ "page_number": 1, "text_content": "Refunds within 30 days." }])),
        ..ModelInvocationResult::default()
    })])
}

async fn request(server: &McpServer, id: i64, method: &str, params: Value) -> JsonRpcMessage {
    let line = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    server
        .handle_message(&line.to_string())
        .await
        .expect("requests always get a reply")
}

async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> CallToolResult {
    match request(server, 1, "tools/call", json!({ "name": name, "arguments": arguments })).await
    {
        JsonRpcMessage::Response(response) => {
            serde_json::from_value(response.result).expect("should be a tool result")
        }
        JsonRpcMessage::ErrorResponse(response) => {
            panic!("tool call failed: {:?}", response.error)
        }
    }
}

fn error_code(message: &JsonRpcMessage) -> i32 {
    match message {
        JsonRpcMessage::ErrorResponse(response) => response.error.code,
        JsonRpcMessage::Response(response) => panic!("expected an error, got {}", response.result),
    }
}

fn texts(result: &CallToolResult) -> Vec<&str> {
    result
        .content
        .iter()
        .map(|content| match content {
            ToolContent::Text { text } => text.as_str(),
        })
        .collect()
}

#[test]
fn tools_are_listed_in_registration_order() {
    let names: Vec<_> = server()
        .tool_definitions()
        .into_iter()
        .map(|tool| tool.name)
        .collect();

    assert_eq!(names, ["ask", "history", "clear_conversation", "ingest_pdf"]);
}

#[test]
fn ask_tool_requires_only_the_question() {
    let schema = tools::AskHandler::tool_definition().input_schema;

    assert_eq!(schema["required"], json!(["question"]));
    assert_eq!(schema["properties"]["conversation_id"]["type"], "string");
}

#[test]
fn ask_description_matches_the_attempt_limit() {
    let description = tools::AskHandler::tool_definition()
        .description
        .expect("ask is described");

    assert!(description.contains("configured attempt limit"));
    assert!(!description.contains("once"));
}

#[test]
fn conversation_tools_require_an_id() {
    for tool in [
        tools::HistoryHandler::tool_definition(),
        tools::ClearConversationHandler::tool_definition(),
    ] {
        assert_eq!(tool.input_schema["required"], json!(["conversation_id"]));
    }
}

#[tokio::test]
async fn initialize_echoes_a_supported_protocol_version() {
    let server = server();

    let reply = request(
        &server,
        1,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
    .await;

    let JsonRpcMessage::Response(response) = reply else {
        panic!("initialize should succeed");
    };
    assert_eq!(response.result["protocolVersion"], "2024-11-05");
    assert_eq!(response.result["serverInfo"]["name"], "docintel");
    assert!(response.result["capabilities"]["tools"].is_object());
    assert_eq!(server.connection_state().await, ConnectionState::Initializing);
}

#[tokio::test]
async fn unknown_protocol_version_gets_the_current_one() {
    let reply = request(
        &server(),
        1,
        "initialize",
        json!({ "protocolVersion": "1999-01-01", "capabilities": {} }),
    )
    .await;

    let JsonRpcMessage::Response(response) = reply else {
        panic!("initialize should succeed");
    };
    assert_eq!(response.result["protocolVersion"], MCP_VERSION);
}

#[tokio::test]
async fn initialized_notification_has_no_reply() {
    let server = server();

    let reply = server
        .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;

    assert!(reply.is_none());
    assert_eq!(server.connection_state().await, ConnectionState::Ready);
}

#[tokio::test]
async fn malformed_lines_get_protocol_errors() {
    let server = server();

    let parse = server
        .handle_message("{not json")
        .await
        .expect("should reply");
    assert_eq!(error_code(&parse), error_codes::PARSE_ERROR);
    assert!(parse.id().is_none());

    let missing_method = server
        .handle_message(r#"{"jsonrpc":"2.0","id":7}"#)
        .await
        .expect("should reply");
    assert_eq!(error_code(&missing_method), error_codes::INVALID_REQUEST);
    assert_eq!(
        missing_method.id(),
        Some(&crate::mcp::protocol::RequestId::Number(7))
    );

    assert!(server.handle_message("   \n").await.is_none());
}

#[tokio::test]
async fn unknown_method_is_reported() {
    let reply = request(&server(), 3, "resources/list", json!({})).await;

    assert_eq!(error_code(&reply), error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn ask_returns_the_answer_then_its_details() {
    let server = server();

    let result = call_tool(
        &server,
        "ask",
        json!({ "question": "What is the refund window?", "conversation_id": "conv-1" }),
    )
    .await;

    assert_eq!(result.is_error, Some(false));
    let parts = texts(&result);
    assert_eq!(parts[0], GROUNDED);
    assert!(parts[1].starts_with("conversation_id: conv-1\nEvaluation: "));
    assert!(parts[1].contains("- policy.pdf, page 2 (score 0.87)"));

    let history = call_tool(&server, "history", json!({ "conversation_id": "conv-1" })).await;
    let lines: Vec<_> = texts(&history)[0].lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("user: What is the refund window?"));
    assert!(lines[1].ends_with(&format!("assistant: {}", GROUNDED)));
}

#[tokio::test]
async fn ask_without_question_is_invalid_params() {
    let server = server();

    for arguments in [json!({}), json!({ "question": "   " })] {
        let reply = request(
            &server,
            2,
            "tools/call",
            json!({ "name": "ask", "arguments": arguments }),
        )
        .await;
        assert_eq!(error_code(&reply), error_codes::INVALID_PARAMS);
    }
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let reply = request(
        &server(),
        2,
        "tools/call",
        json!({ "name": "search_docs", "arguments": {} }),
    )
    .await;

    assert_eq!(error_code(&reply), error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn model_failure_is_a_tool_error_not_a_protocol_error() {
    let (server, _) = server_with(&[], ScriptedGateway::answers(&[]));

    let result = call_tool(&server, "ask", json!({ "question": "Anything?" })).await;

    assert_eq!(result.is_error, Some(true));
    assert!(texts(&result)[0].starts_with("Failed to answer:"));
}

#[tokio::test]
async fn clear_conversation_empties_history() {
    let server = server();
    call_tool(
        &server,
        "ask",
        json!({ "question": "What is the refund window?", "conversation_id": "conv-9" }),
    )
    .await;

    let cleared = call_tool(
        &server,
        "clear_conversation",
        json!({ "conversation_id": "conv-9" }),
    )
    .await;
    let history = call_tool(&server, "history", json!({ "conversation_id": "conv-9" })).await;

    assert_eq!(texts(&cleared), ["Cleared conversation conv-9"]);
    assert_eq!(texts(&history), ["No messages in conversation conv-9"]);
}

#[tokio::test]
async fn ingest_pdf_accepts_base64_content() {
    let (server, index) = server_with(&[], one_page_extraction());

    let result = call_tool(
        &server,
        "ingest_pdf",
        json!({ "content_base64": STANDARD.encode(b"%PDF-1.4 test"), "file_name": "policy.pdf" }),
    )
    .await;

    assert_eq!(result.is_error, Some(false));
    assert_eq!(texts(&result), ["Indexed 1 page(s) from policy.pdf"]);
    assert_eq!(
        *index.upserted.lock().expect("lock should not be poisoned"),
        ["policy.pdf"]
    );
}

#[tokio::test]
async fn ingest_pdf_reads_a_path_and_names_it_after_the_file() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("handbook.pdf");
    std::fs::write(&path, b"%PDF-1.7 handbook").expect("should write pdf");
    let (server, _) = server_with(&[], one_page_extraction());

    let result = call_tool(
        &server,
        "ingest_pdf",
        json!({ "path": path.to_string_lossy() }),
    )
    .await;

    assert_eq!(texts(&result), ["Indexed 1 page(s) from handbook.pdf"]);
}

#[tokio::test]
async fn ingest_pdf_needs_exactly_one_source() {
    let server = server();

    for arguments in [
        json!({}),
        json!({ "path": "a.pdf", "content_base64": "JVBERg==" }),
        json!({ "content_base64": "not base64!" }),
    ] {
        let reply = request(
            &server,
            4,
            "tools/call",
            json!({ "name": "ingest_pdf", "arguments": arguments }),
        )
        .await;
        assert_eq!(error_code(&reply), error_codes::INVALID_PARAMS);
    }
}

#[tokio::test]
async fn missing_file_is_a_tool_error() {
    let result = call_tool(
        &server(),
        "ingest_pdf",
        json!({ "path": "/definitely/not/here.pdf" }),
    )
    .await;

    assert_eq!(result.is_error, Some(true));
    assert!(texts(&result)[0].starts_with("Failed to read /definitely/not/here.pdf"));
}

#[tokio::test]
async fn serve_answers_each_line_and_stops_at_eof() {
    let server = server();
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#,
        "\n",
    );
    let mut output = Vec::new();

    server
        .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
        .await
        .expect("serve should finish cleanly");

    let replies: Vec<Value> = String::from_utf8(output)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is json"))
        .collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0], json!({ "jsonrpc": "2.0", "id": 1, "result": {} }));
    assert_eq!(replies[1]["id"], "two");
    assert_eq!(replies[1]["result"]["tools"].as_array().map(Vec::len), Some(4));
    assert_eq!(server.connection_state().await, ConnectionState::Closed);
    assert!(server.shutdown_token().is_cancelled());
}

use chrono::Utc;
use serde_json::json;

use super::*;

fn row(role: &str, metadata: Option<&str>) -> StoredMessage {
    StoredMessage {
        id: 7,
        conversation_id: "abc12345".to_string(),
        role: role.to_string(),
        content: "30 days".to_string(),
        metadata: metadata.map(str::to_string),
        created_at: Utc::now(),
    }
}

#[test]
fn stored_row_converts_to_message() {
    let message = Message::try_from(row("assistant", Some(r#"{"sources":[]}"#)))
        .expect("should convert");

    assert_eq!(message.role, Role::Assistant);
    assert_eq!(message.content, "30 days");
    assert_eq!(message.metadata, Some(json!({ "sources": [] })));
}

#[test]
fn unknown_role_is_a_database_error() {
    let error = Message::try_from(row("tool", None)).expect_err("should reject role");

    assert!(matches!(error, DocIntelError::Database(ref m) if m.contains("tool")));
}

#[test]
fn corrupt_metadata_is_a_database_error() {
    let error = Message::try_from(row("user", Some("{not json"))).expect_err("should reject");

    assert!(matches!(error, DocIntelError::Database(ref m) if m.contains("message 7")));
}

#[test]
fn new_row_encodes_metadata() {
    let message = Message::assistant("ok").with_metadata(json!({ "k": 1 }));

    let new_row = NewStoredMessage::from_message("c1", &message).expect("should encode");

    assert_eq!(new_row.role, "assistant");
    assert_eq!(new_row.metadata.as_deref(), Some(r#"{"k":1}"#));
}

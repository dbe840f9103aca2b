use super::*;
use crate::ingest::transform_into_records;
use serde_json::json;
use tempfile::TempDir;

const VOCABULARY: [&str; 3] = ["refund", "shipping", "warranty"];

/// One axis per vocabulary word plus a catch-all axis
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn dimensions(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut vector: Vec<f32> = VOCABULARY
                    .iter()
                    .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
                    .collect();
                let hits: f32 = vector.iter().sum();
                vector.push(if hits == 0.0 { 1.0 } else { 0.0 });
                vector
            })
            .collect())
    }
}

struct WideEmbedder;

#[async_trait]
impl Embedder for WideEmbedder {
    fn dimensions(&self) -> usize {
        8
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; 8]).collect())
    }
}

fn policy_records() -> Vec<RetrievableRecord> {
    let payload = json!([
        { "page_number": 1, "text_content": "Refunds must be requested within 30 days." },
        { "page_number": 2, "text_content": "Shipping takes five business days." },
        { "page_number": 3 }
    ]);
    transform_into_records(&payload, "policy.pdf").expect("should transform")
}

async fn open_index(dir: &TempDir) -> LanceVectorIndex {
    LanceVectorIndex::open(&dir.path().join("vectors"), Arc::new(KeywordEmbedder))
        .await
        .expect("should open index")
}

#[tokio::test]
async fn search_returns_the_closest_page_with_provenance() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = open_index(&dir).await;
    index
        .upsert(&policy_records())
        .await
        .expect("should upsert");

    let passages = index
        .search("What is the refund window?", 3, 0.5)
        .await
        .expect("should search");

    assert_eq!(passages.len(), 1);
    let hit = &passages[0];
    assert_eq!(hit.source_id, "policy.pdf");
    assert_eq!(hit.page_number, Some(1));
    assert!(hit.content.contains("30 days"));
    assert!(hit.score > 0.99, "score was {}", hit.score);
    assert_eq!(hit.metadata["page_number"], json!(1));
}

#[tokio::test]
async fn min_score_and_top_k_bound_results() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = open_index(&dir).await;
    index
        .upsert(&policy_records())
        .await
        .expect("should upsert");

    let everything = index
        .search("refund", 10, 0.0)
        .await
        .expect("should search");
    let one = index.search("refund", 1, 0.0).await.expect("should search");
    let none = index.search("refund", 0, 0.0).await.expect("should search");

    assert_eq!(everything.len(), 3);
    assert!(everything.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(one.len(), 1);
    assert!(none.is_empty());
}

#[tokio::test]
async fn upsert_replaces_records_with_the_same_id() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = open_index(&dir).await;

    index
        .upsert(&policy_records())
        .await
        .expect("first upsert");
    index
        .upsert(&policy_records())
        .await
        .expect("second upsert");

    assert_eq!(index.count().await.expect("should count"), 3);
}

#[tokio::test]
async fn shorter_document_drops_its_old_pages() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = open_index(&dir).await;
    index
        .upsert(&policy_records())
        .await
        .expect("first upsert");

    let revised = transform_into_records(
        &json!([{ "page_number": 1, "text_content": "Refunds within 60 days." }]),
        "policy.pdf",
    )
    .expect("should transform");
    index.upsert(&revised).await.expect("second upsert");

    assert_eq!(index.count().await.expect("should count"), 1);
}

#[tokio::test]
async fn other_sources_are_left_alone() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = open_index(&dir).await;
    index
        .upsert(&policy_records())
        .await
        .expect("first upsert");

    let other = transform_into_records(
        &json!([{ "page_number": 1, "text_content": "Warranty lasts one year." }]),
        "warranty's terms.pdf",
    )
    .expect("should transform");
    index.upsert(&other).await.expect("second upsert");

    assert_eq!(index.count().await.expect("should count"), 4);
}

#[tokio::test]
async fn reopening_keeps_records() {
    let dir = TempDir::new().expect("should create temp dir");
    open_index(&dir)
        .await
        .upsert(&policy_records())
        .await
        .expect("should upsert");

    let reopened = open_index(&dir).await;

    assert_eq!(reopened.count().await.expect("should count"), 3);
}

#[tokio::test]
async fn dimension_mismatch_is_reported() {
    let dir = TempDir::new().expect("should create temp dir");
    drop(open_index(&dir).await);

    let result = LanceVectorIndex::open(&dir.path().join("vectors"), Arc::new(WideEmbedder)).await;

    assert!(
        matches!(result, Err(DocIntelError::Database(ref m)) if m.contains("dimension mismatch"))
    );
}

#[tokio::test]
async fn empty_upsert_is_a_no_op() {
    let dir = TempDir::new().expect("should create temp dir");
    let index = open_index(&dir).await;

    assert_eq!(index.upsert(&[]).await.expect("should upsert"), 0);
    assert!(
        index
            .search("refund", 3, 0.0)
            .await
            .expect("should search")
            .is_empty()
    );
}

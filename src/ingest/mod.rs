//! PDF ingestion: multimodal extraction, page transform, index upsert.

mod extraction;
mod transform;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::{
    Attachment, ModelError, ModelGateway, ModelInvocationRequest, TokenUsage, parse_json_payload,
};
use crate::retrieval::VectorIndex;
use crate::{DocIntelError, Result};

pub use extraction::{EXTRACTION_PROMPT, ExtractedImage, PageExtraction, page_schema};
pub use transform::{
    RetrievableRecord, canonical_json, page_to_record, parse_pages, record_id,
    transform_into_records,
};

/// Outcome of ingesting one document
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub file_name: String,
    pub record_count: usize,
    pub raw_extraction_json: String,
    pub usage: Option<TokenUsage>,
}

pub struct IngestionService {
    gateway: Arc<dyn ModelGateway>,
    index: Arc<dyn VectorIndex>,
}

impl IngestionService {
    #[inline]
    pub fn new(gateway: Arc<dyn ModelGateway>, index: Arc<dyn VectorIndex>) -> Self {
        Self { gateway, index }
    }

    /// Extracts every page of `pdf`, transforms the pages into records and
    /// upserts them. A malformed extraction rejects the whole document before
    /// anything reaches the index.
    #[inline]
    pub async fn ingest(
        &self,
        pdf: impl Into<Arc<[u8]>>,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let pdf: Arc<[u8]> = pdf.into();
        if pdf.is_empty() {
            return Err(DocIntelError::InvalidRequest(
                "document is empty".to_string(),
            ));
        }
        if !pdf.starts_with(b"%PDF") {
            warn!("{} does not start with a PDF header", file_name);
        }
        let file_name = display_name(file_name);

        let request = ModelInvocationRequest::new(EXTRACTION_PROMPT)
            .with_output_schema(page_schema())
            .with_attachment(Attachment::pdf(&file_name, pdf));

        info!(
            "Extracting {} with {}",
            file_name,
            self.gateway.model_name()
        );
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ModelError::Cancelled.into()),
            result = self.gateway.invoke(&request) => result?,
        };

        match result.usage.as_ref().and_then(|usage| usage.total) {
            Some(total) => info!("Total tokens used in extraction: {}", total),
            None => info!("No usage metadata found for extraction"),
        }

        let payload = extraction_payload(result.structured, result.text.as_deref())?;
        let raw_extraction_json = payload.to_string();
        let records = transform_into_records(&payload, &file_name)?;
        debug!(
            "Extraction of {} produced {} pages",
            file_name,
            records.len()
        );

        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled.into());
        }
        let record_count = self.index.upsert(&records).await?;
        info!("Indexed {} records from {}", record_count, file_name);

        Ok(IngestReport {
            file_name,
            record_count,
            raw_extraction_json,
            usage: result.usage,
        })
    }
}

fn extraction_payload(structured: Option<Value>, text: Option<&str>) -> Result<Value> {
    if let Some(value) = structured {
        return Ok(value);
    }
    let text = text.unwrap_or_default();
    parse_json_payload(text).ok_or_else(|| {
        DocIntelError::MalformedExtraction("model did not return JSON".to_string())
    })
}

/// Final path component, so uploads keep their name but not the client's path
fn display_name(file_name: &str) -> String {
    Path::new(file_name.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("document.pdf")
        .to_string()
}

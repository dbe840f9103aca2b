//! Converts a structured page extraction into retrievable records.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::extraction::PageExtraction;
use crate::{DocIntelError, Result};

/// The unit stored in the vector index: a synthesized page body plus provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievableRecord {
    id: Uuid,
    body: String,
    metadata: Map<String, Value>,
}

impl RetrievableRecord {
    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[inline]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    #[inline]
    pub fn source_file_name(&self) -> &str {
        self.metadata
            .get("source_file_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    #[inline]
    pub fn page_number(&self) -> Option<u32> {
        self.metadata
            .get("page_number")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// Stable id so re-ingesting a document replaces its pages
#[inline]
pub fn record_id(file_name: &str, page_number: u32) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{file_name}#page-{page_number}").as_bytes(),
    )
}

/// Parses the model's payload into pages, rejecting anything that is not an
/// array of page objects with unique page numbers.
#[inline]
pub fn parse_pages(payload: &Value) -> Result<Vec<PageExtraction>> {
    let Value::Array(items) = payload else {
        return Err(DocIntelError::MalformedExtraction(format!(
            "expected an array of pages, got {}",
            json_kind(payload)
        )));
    };

    let mut seen = HashSet::with_capacity(items.len());
    let mut pages = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let page = PageExtraction::deserialize(item).map_err(|e| {
            DocIntelError::MalformedExtraction(format!("page entry {index} is invalid: {e}"))
        })?;
        if !seen.insert(page.page_number) {
            return Err(DocIntelError::MalformedExtraction(format!(
                "page {} appears more than once",
                page.page_number
            )));
        }
        pages.push(page);
    }
    Ok(pages)
}

/// Parses and transforms a payload in one step. Nothing is returned unless
/// every page is valid.
#[inline]
pub fn transform_into_records(payload: &Value, file_name: &str) -> Result<Vec<RetrievableRecord>> {
    let pages = parse_pages(payload)?;
    Ok(pages
        .iter()
        .map(|page| page_to_record(page, file_name))
        .collect())
}

/// Builds the record for one page. Pages keep their input order and are
/// never dropped; a page without content gets a `Page <n> (empty)` body.
#[inline]
pub fn page_to_record(page: &PageExtraction, file_name: &str) -> RetrievableRecord {
    RetrievableRecord {
        id: record_id(file_name, page.page_number),
        body: page_body(page),
        metadata: page_metadata(page, file_name),
    }
}

fn page_body(page: &PageExtraction) -> String {
    let mut sections = String::new();

    if !page.extracted_tables.is_empty() {
        sections.push_str("Tables:\n");
        for table in &page.extracted_tables {
            sections.push_str(table);
            sections.push('\n');
        }
    }

    if !page.images.is_empty() {
        sections.push_str("Images:\n");
        for caption in page
            .images
            .iter()
            .filter_map(|image| image.caption.as_deref())
            .filter(|caption| !caption.trim().is_empty())
        {
            sections.push_str("Caption: ");
            sections.push_str(caption);
            sections.push('\n');
        }
    }

    if !page.json_blocks.is_empty() {
        sections.push_str("JSON Blocks:\n");
        for block in &page.json_blocks {
            sections.push_str(&canonical_json(block));
            sections.push('\n');
        }
    }

    if let Some(text) = page
        .text_content
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
    {
        sections.push_str("Text:\n");
        sections.push_str(text);
    }

    let sections = sections.trim();
    if sections.is_empty() {
        format!("Page {} (empty)", page.page_number)
    } else {
        format!("Page {}\n{}", page.page_number, sections)
    }
}

fn page_metadata(page: &PageExtraction, file_name: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("source_file_name".to_string(), json!(file_name));
    metadata.insert("page_number".to_string(), json!(page.page_number));
    if !page.extracted_tables.is_empty() {
        metadata.insert("tables".to_string(), json!(page.extracted_tables));
    }
    if !page.images.is_empty() {
        metadata.insert("images".to_string(), json!(page.images));
    }
    if !page.json_blocks.is_empty() {
        metadata.insert("json_blocks".to_string(), json!(page.json_blocks));
    }
    metadata
}

/// Compact JSON with object keys sorted at every depth
#[inline]
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                let mut out = Map::new();
                for (k, v) in ordered {
                    out.insert(k.clone(), v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

/// Instructions sent with the PDF to the multimodal model
pub const EXTRACTION_PROMPT: &str = "Work through this PDF one page at a time.
For every page:
1. Extract each table and write it as valid Markdown.
2. Find images, charts and diagrams and write a detailed caption for each.
3. Extract any JSON blocks as valid JSON.
4. Extract the page's running text.
5. Copy any OCR-style or machine-readable text blocks verbatim.
Answer with strict JSON that matches the provided schema, one entry per page.";

/// One page of the model's structured extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction {
    pub page_number: u32,
    #[serde(default, deserialize_with = "non_null_strings")]
    pub extracted_tables: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<ExtractedImage>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub json_blocks: Vec<Value>,
    #[serde(default)]
    pub text_content: Option<String>,
}

impl PageExtraction {
    #[inline]
    pub fn empty(page_number: u32) -> Self {
        Self {
            page_number,
            extracted_tables: Vec::new(),
            images: Vec::new(),
            json_blocks: Vec::new(),
            text_content: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_null_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items: Vec<Option<String>> = null_as_empty(deserializer)?;
    Ok(items.into_iter().flatten().collect())
}

/// Response schema: an array of pages where only `page_number` is required
#[inline]
pub fn page_schema() -> Value {
    let nullable_string = json!({ "type": "string", "nullable": true });
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "page_number": { "type": "integer" },
                "extracted_tables": {
                    "type": "array",
                    "nullable": true,
                    "items": nullable_string
                },
                "images": {
                    "type": "array",
                    "nullable": true,
                    "items": {
                        "type": "object",
                        "properties": {
                            "caption": nullable_string,
                            "source": nullable_string
                        }
                    }
                },
                "json_blocks": {
                    "type": "array",
                    "nullable": true,
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {
                                "type": "object",
                                "properties": { "raw": nullable_string }
                            }
                        }
                    }
                },
                "text_content": nullable_string
            },
            "required": ["page_number"]
        }
    })
}

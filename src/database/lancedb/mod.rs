//! LanceDB-backed vector index over ingested pages.

#[cfg(test)]
mod tests;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::ingest::RetrievableRecord;
use crate::retrieval::{RetrievedPassage, VectorIndex};
use crate::{DocIntelError, Result};

pub const TABLE_NAME: &str = "passages";

pub struct LanceVectorIndex {
    table: Table,
    embedder: Arc<dyn Embedder>,
    dimension: usize,
}

impl LanceVectorIndex {
    /// Opens (or creates) the passage table under `path`.
    ///
    /// An existing table whose vector width differs from the embedder's is
    /// an error: the index has to be rebuilt with the old embedding model
    /// removed first.
    #[inline]
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            DocIntelError::Database(format!("Failed to create vector database directory: {e}"))
        })?;

        let uri = path.to_string_lossy().to_string();
        debug!("Opening LanceDB at {}", uri);
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        let dimension = embedder.dimensions();
        let table = open_or_create_table(&connection, dimension).await?;

        info!("Vector index ready at {} ({} dimensions)", uri, dimension);
        Ok(Self {
            table,
            embedder,
            dimension,
        })
    }

    #[inline]
    pub async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to count rows: {e}")))
    }

    fn record_batch(&self, records: &[RetrievableRecord], vectors: &[Vec<f32>]) -> Result<RecordBatch> {
        let len = records.len();
        let mut ids = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut metadata = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id().to_string());
            sources.push(record.source_file_name().to_string());
            pages.push(record.page_number());
            contents.push(record.body().to_string());
            metadata.push(
                serde_json::to_string(record.metadata())
                    .map_err(|e| DocIntelError::Database(format!("Failed to encode metadata: {e}")))?,
            );
        }

        let mut flat_values = Vec::with_capacity(len * self.dimension);
        for vector in vectors {
            if vector.len() != self.dimension {
                return Err(DocIntelError::Embedding(format!(
                    "Embedding has {} dimensions, expected {}",
                    vector.len(),
                    self.dimension
                )));
            }
            flat_values.extend_from_slice(vector);
        }
        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            item,
            list_width(self.dimension)?,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| DocIntelError::Database(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(metadata)),
        ];

        RecordBatch::try_new(schema(self.dimension)?, arrays)
            .map_err(|e| DocIntelError::Database(format!("Failed to create record batch: {e}")))
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedPassage>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_texts(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| DocIntelError::Embedding("No embedding for query".to_string()))?;

        let mut stream = self
            .table
            .vector_search(query_vector)
            .map_err(|e| DocIntelError::Database(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to execute search: {e}")))?;

        let mut passages = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to read result stream: {e}")))?
        {
            passages.extend(parse_search_batch(&batch)?);
        }

        let before = passages.len();
        passages.retain(|p| p.score >= min_score);
        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages.truncate(top_k);
        debug!(
            "Search returned {} passages ({} below {:.2})",
            passages.len(),
            before - passages.len(),
            min_score
        );
        Ok(passages)
    }

    /// Embeds everything before touching the table, then replaces rows by id
    async fn upsert(&self, records: &[RetrievableRecord]) -> Result<usize> {
        if records.is_empty() {
            debug!("No records to upsert");
            return Ok(0);
        }

        let texts: Vec<String> = records.iter().map(|r| r.body().to_string()).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;
        if vectors.len() != records.len() {
            return Err(DocIntelError::Embedding(format!(
                "Expected {} embeddings, got {}",
                records.len(),
                vectors.len()
            )));
        }
        let batch = self.record_batch(records, &vectors)?;

        let predicate = format!(
            "id IN ({}) OR source_file_name IN ({})",
            records.iter().map(|r| format!("'{}'", r.id())).join(", "),
            records
                .iter()
                .map(RetrievableRecord::source_file_name)
                .unique()
                .map(|name| format!("'{}'", name.replace('\'', "''")))
                .join(", ")
        );
        self.table
            .delete(&predicate)
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to replace records: {e}")))?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        self.table
            .add(reader)
            .execute()
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to insert records: {e}")))?;

        info!("Upserted {} records", records.len());
        Ok(records.len())
    }
}

async fn open_or_create_table(connection: &Connection, dimension: usize) -> Result<Table> {
    let names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| DocIntelError::Database(format!("Failed to list tables: {e}")))?;

    if !names.iter().any(|name| name == TABLE_NAME) {
        info!("Creating {} table with {} dimensions", TABLE_NAME, dimension);
        return connection
            .create_empty_table(TABLE_NAME, schema(dimension)?)
            .execute()
            .await
            .map_err(|e| DocIntelError::Database(format!("Failed to create table: {e}")));
    }

    let table = connection
        .open_table(TABLE_NAME)
        .execute()
        .await
        .map_err(|e| DocIntelError::Database(format!("Failed to open table: {e}")))?;
    let existing = table
        .schema()
        .await
        .map_err(|e| DocIntelError::Database(format!("Failed to get table schema: {e}")))?;

    match existing.field_with_name("vector").map(|f| f.data_type().clone()) {
        Ok(DataType::FixedSizeList(_, size)) if usize::try_from(size).ok() == Some(dimension) => {
            Ok(table)
        }
        Ok(DataType::FixedSizeList(_, size)) => {
            warn!(
                "Vector index holds {}-dimension vectors but the embedder produces {}",
                size, dimension
            );
            Err(DocIntelError::Database(format!(
                "Vector dimension mismatch: index has {size}, embedder has {dimension}; remove the vector directory and re-ingest"
            )))
        }
        _ => Err(DocIntelError::Database(
            "Could not find vector column or determine dimension".to_string(),
        )),
    }
}

fn list_width(dimension: usize) -> Result<i32> {
    i32::try_from(dimension)
        .map_err(|_| DocIntelError::Database(format!("Vector dimension {dimension} is too large")))
}

fn schema(dimension: usize) -> Result<Arc<Schema>> {
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                list_width(dimension)?,
            ),
            false,
        ),
        Field::new("source_file_name", DataType::Utf8, false),
        Field::new("page_number", DataType::UInt32, true),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata_json", DataType::Utf8, false),
    ])))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DocIntelError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| DocIntelError::Database(format!("Invalid {name} column type")))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<RetrievedPassage>> {
    let sources = string_column(batch, "source_file_name")?;
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata_json")?;
    let pages = batch
        .column_by_name("page_number")
        .ok_or_else(|| DocIntelError::Database("Missing page_number column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| DocIntelError::Database("Invalid page_number column type".to_string()))?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut passages = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
        let metadata = serde_json::from_str::<Map<String, Value>>(metadata.value(row))
            .unwrap_or_else(|e| {
                warn!("Ignoring unreadable metadata for row {}: {}", row, e);
                Map::new()
            });

        passages.push(RetrievedPassage {
            source_id: sources.value(row).to_string(),
            page_number: (!pages.is_null(row)).then(|| pages.value(row)),
            content: contents.value(row).to_string(),
            score: (1.0 - distance).clamp(0.0, 1.0),
            metadata,
        });
    }
    Ok(passages)
}

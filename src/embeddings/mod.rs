pub mod ollama;

use async_trait::async_trait;

use crate::DocIntelError;

pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};

/// Turns text into fixed-width vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order
    async fn embed_texts(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl Embedder for OllamaClient {
    #[inline]
    fn dimensions(&self) -> usize {
        self.dimension() as usize
    }

    #[inline]
    async fn embed_texts(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_batch(&texts))
            .await
            .map_err(|e| DocIntelError::Embedding(format!("Embedding task failed: {e}")))?
            .map_err(|e| DocIntelError::Embedding(format!("{e:#}")))
    }
}

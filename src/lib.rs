use thiserror::Error;

use crate::advisor::PipelineError;
use crate::model::ModelError;

pub type Result<T> = std::result::Result<T, DocIntelError>;

#[derive(Error, Debug)]
pub enum DocIntelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed extraction: {0}")]
    MalformedExtraction(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod advisor;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod evaluation;
pub mod ingest;
pub mod mcp;
pub mod memory;
pub mod model;
pub mod retrieval;
pub mod service;

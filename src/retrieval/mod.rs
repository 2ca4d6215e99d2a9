mod client;
mod embeddings;
mod vector_store;

pub use client::RetrievalClient;
pub use embeddings::{EmbeddingsClient, RerankResponse, RerankResult};
pub use vector_store::VectorStoreClient;

use std::fmt;

/// How a retrieval entry point failed. `Failed` is the opaque wrapper for
/// any transport/parse problem in the embed/query/rerank path;
/// `InvalidFilter` is kept distinct so the tool message can say exactly
/// what was wrong with the metadata filter.
#[derive(Debug)]
pub enum RetrievalError {
    Failed(String),
    InvalidFilter(String),
}

impl RetrievalError {
    pub fn failed(detail: impl fmt::Display) -> Self {
        RetrievalError::Failed(detail.to_string())
    }
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalError::Failed(detail) => {
                write!(f, "The retrieval client failed: {}", detail)
            }
            RetrievalError::InvalidFilter(reason) => {
                write!(f, "The metadata filter is invalid: {}", reason)
            }
        }
    }
}

impl std::error::Error for RetrievalError {}

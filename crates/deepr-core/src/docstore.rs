// Document store port
//
// Abstract contract over vector stores. The engine only needs create,
// add, search and delete; embedding and chunking are the backend's concern.

use async_trait::async_trait;

use crate::error::Result;

/// Document uploaded into a store
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl Document {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: content.into().into_bytes(),
            mime: "text/plain".to_string(),
        }
    }
}

/// Retrieval hit returned by `search`
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_ref: String,
    pub score: f64,
    pub excerpt: String,
}

/// Trait for document store backends
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_store(&self, name: &str) -> Result<String>;

    /// Add documents, returning one doc_ref per document in input order
    async fn add(&self, store_ref: &str, documents: Vec<Document>) -> Result<Vec<String>>;

    async fn search(&self, store_ref: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;

    async fn delete(&self, store_ref: &str) -> Result<()>;
}

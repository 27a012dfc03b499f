//! Document block sources.
//!
//! The scheduler addresses text as `(document_id, block_index)`. Block
//! segmentation happens upstream; a [`DocumentSource`] only hands out the
//! already-segmented text.

mod http;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

pub use http::HttpDocumentSource;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid document: {0}")]
    Invalid(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Read-only access to segmented documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// All blocks of a document, in reading order.
    async fn blocks(&self, document_id: &str) -> DocumentResult<Arc<Vec<String>>>;

    /// Text of one block, or `None` when the index is past the end.
    async fn block(&self, document_id: &str, index: usize) -> DocumentResult<Option<String>> {
        Ok(self.blocks(document_id).await?.get(index).cloned())
    }

    async fn block_count(&self, document_id: &str) -> DocumentResult<usize> {
        Ok(self.blocks(document_id).await?.len())
    }
}

/// Documents registered through the HTTP API or by tests.
#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    documents: DashMap<String, Arc<Vec<String>>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a document. Returns the block count.
    pub fn insert(&self, document_id: impl Into<String>, blocks: Vec<String>) -> usize {
        let count = blocks.len();
        self.documents.insert(document_id.into(), Arc::new(blocks));
        count
    }

    pub fn get(&self, document_id: &str) -> Option<Arc<Vec<String>>> {
        self.documents.get(document_id).map(|doc| doc.clone())
    }

    pub fn remove(&self, document_id: &str) -> bool {
        self.documents.remove(document_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentSource for InMemoryDocuments {
    async fn blocks(&self, document_id: &str) -> DocumentResult<Arc<Vec<String>>> {
        self.get(document_id)
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))
    }
}

/// Local documents first, then an optional remote source.
pub struct LayeredDocuments {
    local: Arc<InMemoryDocuments>,
    remote: Option<Arc<dyn DocumentSource>>,
}

impl LayeredDocuments {
    pub fn new(local: Arc<InMemoryDocuments>, remote: Option<Arc<dyn DocumentSource>>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl DocumentSource for LayeredDocuments {
    async fn blocks(&self, document_id: &str) -> DocumentResult<Arc<Vec<String>>> {
        if let Some(doc) = self.local.get(document_id) {
            return Ok(doc);
        }
        match &self.remote {
            Some(remote) => remote.blocks(document_id).await,
            None => Err(DocumentError::NotFound(document_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_block_lookup() {
        let docs = InMemoryDocuments::new();
        assert_eq!(docs.insert("doc", vec!["One.".into(), "Two.".into()]), 2);

        assert_eq!(docs.block("doc", 1).await.unwrap(), Some("Two.".to_string()));
        assert_eq!(docs.block("doc", 2).await.unwrap(), None);
        assert_eq!(docs.block_count("doc").await.unwrap(), 2);
        assert!(matches!(
            docs.block("missing", 0).await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_layered_prefers_local() {
        let local = Arc::new(InMemoryDocuments::new());
        let remote = Arc::new(InMemoryDocuments::new());
        local.insert("shared", vec!["local".into()]);
        remote.insert("shared", vec!["remote".into()]);
        remote.insert("remote-only", vec!["r".into()]);

        let layered = LayeredDocuments::new(local, Some(remote as Arc<dyn DocumentSource>));
        assert_eq!(layered.block("shared", 0).await.unwrap(), Some("local".into()));
        assert_eq!(layered.block("remote-only", 0).await.unwrap(), Some("r".into()));
        assert!(layered.blocks("nowhere").await.is_err());
    }
}

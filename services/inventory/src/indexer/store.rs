//! Search store seam

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Search store request failed: {0}")]
    Request(String),

    #[error("Search store rejected document {document_id} in {index}: {reason}")]
    Rejected {
        index: String,
        document_id: String,
        reason: String,
    },
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Request(e.to_string())
    }
}

/// Document store keyed by (index, document id)
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Insert or fully replace the document.
    async fn upsert(&self, index: &str, document_id: &str, document: Value) -> Result<(), StoreError>;

    async fn get(&self, index: &str, document_id: &str) -> Result<Option<Value>, StoreError>;
}

/// In-memory store, used by the standalone mode and tests
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Number of documents in `index`
    pub async fn count(&self, index: &str) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|(i, _)| i == index)
            .count()
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn upsert(&self, index: &str, document_id: &str, document: Value) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert((index.to_string(), document_id.to_string()), document);
        Ok(())
    }

    async fn get(&self, index: &str, document_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .get(&(index.to_string(), document_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemoryStore::new();
        store.upsert("awss3bucket", "id-1", json!({"a": 1, "b": 2})).await.unwrap();
        store.upsert("awss3bucket", "id-1", json!({"a": 3})).await.unwrap();
        store.upsert("awsaccount", "id-1", json!({"c": 1})).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(store.count("awss3bucket").await, 1);
        assert_eq!(store.get("awss3bucket", "id-1").await.unwrap(), Some(json!({"a": 3})));
        assert_eq!(store.get("awss3bucket", "missing").await.unwrap(), None);
    }
}

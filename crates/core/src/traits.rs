use crate::error::{EmbeddingError, StorageError, VectorStoreError};
use crate::models::{DistanceMetric, MetadataFilter, StoreHit, VectorRecord};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Request body understood by the embedding model's invoke endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRequest<'a> {
    pub input_text: &'a str,
    pub dimensions: usize,
    pub normalize: bool,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the provider's raw JSON response; vector extraction happens in
    /// [`crate::Embedder`].
    async fn invoke(
        &self,
        model_id: &str,
        request: &EmbeddingRequest<'_>,
    ) -> Result<Value, EmbeddingError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn distance_metric(&self) -> DistanceMetric;

    fn vector_size(&self) -> usize;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, VectorStoreError>;

    async fn delete_document(&self, user_id: &str, paper_id: &str) -> Result<(), VectorStoreError>;

    async fn query(
        &self,
        query_vector: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<StoreHit>, VectorStoreError>;
}

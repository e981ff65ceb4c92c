use crate::error::{EmbeddingError, IngestError, VectorStoreError};
use crate::extractor::PdfExtractor;
use crate::models::{DistanceMetric, MetadataFilter, StoreHit, VectorRecord};
use crate::traits::{EmbeddingProvider, EmbeddingRequest, VectorIndex};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Vector index fake that records every call in order.
pub struct RecordingIndex {
    pub metric: DistanceMetric,
    pub size: usize,
    pub hits: Vec<StoreHit>,
    pub fail_queries: bool,
    pub fail_upsert_after: Option<usize>,
    pub events: Mutex<Vec<String>>,
    pub records: Mutex<Vec<VectorRecord>>,
    pub filters: Mutex<Vec<(MetadataFilter, usize)>>,
}

impl RecordingIndex {
    pub fn new(size: usize) -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            size,
            hits: Vec::new(),
            fail_queries: false,
            fail_upsert_after: None,
            events: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
        }
    }

    pub fn with_distances(size: usize, distances: &[f64]) -> Self {
        let hits = distances
            .iter()
            .enumerate()
            .map(|(index, distance)| StoreHit {
                id: format!("hit-{index}"),
                distance: *distance,
                source_text: Some(format!("text {index}")),
            })
            .collect();
        Self {
            hits,
            ..Self::new(size)
        }
    }

    /// Stores the first `stored` records of every upsert, then fails it, like
    /// a batched backend whose later batch is rejected.
    pub fn failing_upsert_after(size: usize, stored: usize) -> Self {
        Self {
            fail_upsert_after: Some(stored),
            ..Self::new(size)
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn records(&self) -> Vec<VectorRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }

    fn vector_size(&self) -> usize {
        self.size
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, VectorStoreError> {
        self.events
            .lock()
            .expect("events lock")
            .push(format!("upsert:{}", records.len()));
        let accepted = match self.fail_upsert_after {
            Some(stored) => &records[..stored.min(records.len())],
            None => records,
        };
        let mut kept = self.records.lock().expect("records lock");
        for record in accepted {
            match kept.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => kept.push(record.clone()),
            }
        }
        if self.fail_upsert_after.is_some() {
            return Err(VectorStoreError::Request("batch rejected".to_string()));
        }
        Ok(records.len())
    }

    async fn delete_document(&self, user_id: &str, paper_id: &str) -> Result<(), VectorStoreError> {
        self.events
            .lock()
            .expect("events lock")
            .push(format!("delete:{user_id}/{paper_id}"));
        self.records
            .lock()
            .expect("records lock")
            .retain(|record| {
                record.metadata.user_id != user_id || record.metadata.paper_id != paper_id
            });
        Ok(())
    }

    async fn query(
        &self,
        _query_vector: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<StoreHit>, VectorStoreError> {
        self.filters
            .lock()
            .expect("filters lock")
            .push((filter.clone(), top_k));
        if self.fail_queries {
            return Err(VectorStoreError::Request("index unavailable".to_string()));
        }
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

/// Embedding provider returning a vector derived from the text length, and
/// failing for one configured input.
pub struct ScriptedProvider {
    pub fail_on: Option<String>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_on: Some(text.to_string()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn invoke(
        &self,
        _model_id: &str,
        request: &EmbeddingRequest<'_>,
    ) -> Result<Value, EmbeddingError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.input_text.to_string());
        if self.fail_on.as_deref() == Some(request.input_text) {
            return Err(EmbeddingError::Provider("provider returned 500".to_string()));
        }
        let value = request.input_text.len() as f32;
        Ok(json!({ "embedding": vec![value; request.dimensions] }))
    }
}

/// Treats input starting with `%TEXT:` as a document whose text follows the
/// marker; anything else fails to parse.
pub struct PrefixExtractor;

impl PdfExtractor for PrefixExtractor {
    fn extract_text(&self, pdf: &[u8]) -> Result<String, IngestError> {
        pdf.strip_prefix(b"%TEXT:")
            .map(|text| String::from_utf8_lossy(text).into_owned())
            .ok_or_else(|| IngestError::PdfParse("missing text marker".to_string()))
    }
}

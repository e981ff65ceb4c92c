use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, DurationMilliSeconds};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1_000;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v2:0";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Identity of one ingested document: the owning user plus an opaque paper id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub user_id: String,
    pub paper_id: String,
}

impl DocumentKey {
    pub fn new(user_id: impl Into<String>, paper_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            paper_id: paper_id.into(),
        }
    }

    pub fn pdf_object_key(&self) -> String {
        format!("user/{}/papers/{}.pdf", self.user_id, self.paper_id)
    }

    pub fn text_object_key(&self) -> String {
        format!("user/{}/papers/{}.txt", self.user_id, self.paper_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub user_id: String,
    pub sequence_index: u64,
    pub text: String,
    pub char_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub user_id: String,
    pub paper_id: String,
    pub source_text: String,
    pub sequence_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// Restricts a query to one user's records and, optionally, to a set of papers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub user_id: String,
    pub paper_ids: Vec<String>,
}

/// One neighbour as reported by the vector store, in store order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub distance: f64,
    pub source_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub rank: usize,
    pub similarity: f64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Cosine,
    Euclid,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::Euclid => "Euclid",
            DistanceMetric::Dot => "Dot",
        }
    }
}

/// Event that starts ingestion of one extracted text object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestTrigger {
    pub user_id: String,
    pub paper_id: String,
    pub text_s3_bucket: String,
    pub text_s3_key: String,
}

impl IngestTrigger {
    pub fn from_event(event: &serde_json::Value) -> Result<Self, IngestError> {
        let trigger: IngestTrigger = serde_json::from_value(event.clone())
            .map_err(|error| IngestError::MalformedTrigger(error.to_string()))?;

        for (field, value) in [
            ("user_id", &trigger.user_id),
            ("paper_id", &trigger.paper_id),
            ("text_s3_bucket", &trigger.text_s3_bucket),
            ("text_s3_key", &trigger.text_s3_key),
        ] {
            if value.trim().is_empty() {
                return Err(IngestError::MalformedTrigger(format!(
                    "field `{field}` is empty"
                )));
            }
        }

        Ok(trigger)
    }

    pub fn document_key(&self) -> DocumentKey {
        DocumentKey::new(&self.user_id, &self.paper_id)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub user_id: String,
    #[serde(default)]
    pub paper_ids: Option<Vec<String>>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub top_k_chunks: Vec<RetrievalHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub user_id: String,
    pub paper_id: String,
    pub text_length: usize,
    pub text_checksum: String,
    pub num_chunks: usize,
    pub records_written: usize,
    pub chunk_max_chars: usize,
    pub ingested_at: DateTime<Utc>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    pub model_id: String,
    pub dimensions: usize,
    pub normalize: bool,
    /// Maximum number of provider calls in flight for one document.
    pub concurrency: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            normalize: true,
            concurrency: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub chunk_max_chars: usize,
    pub top_k: usize,
    pub pdf_bucket: String,
    pub text_bucket: String,
    pub embedding: EmbeddingOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
            top_k: DEFAULT_TOP_K,
            pdf_bucket: "papers".to_string(),
            text_bucket: "paper-texts".to_string(),
            embedding: EmbeddingOptions::default(),
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        let checks = [
            (self.chunk_max_chars == 0, "chunk_max_chars must be positive"),
            (self.top_k == 0, "top_k must be positive"),
            (self.embedding.dimensions == 0, "embedding.dimensions must be positive"),
            (self.embedding.concurrency == 0, "embedding.concurrency must be positive"),
            (self.embedding.timeout.is_zero(), "embedding.timeout must be non-zero"),
            (self.embedding.model_id.trim().is_empty(), "embedding.model_id is empty"),
            (self.text_bucket.trim().is_empty(), "text_bucket is empty"),
            (self.pdf_bucket.trim().is_empty(), "pdf_bucket is empty"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(IngestError::InvalidConfig((*reason).to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_requires_every_key() {
        let event = json!({
            "user_id": "u-1",
            "paper_id": "p-1",
            "text_s3_bucket": "paper-texts",
        });

        let error = IngestTrigger::from_event(&event).unwrap_err();
        assert!(matches!(error, IngestError::MalformedTrigger(ref reason) if reason.contains("text_s3_key")));
    }

    #[test]
    fn trigger_rejects_blank_user() {
        let event = json!({
            "user_id": "  ",
            "paper_id": "p-1",
            "text_s3_bucket": "paper-texts",
            "text_s3_key": "user/u-1/papers/p-1.txt",
        });

        assert!(matches!(
            IngestTrigger::from_event(&event),
            Err(IngestError::MalformedTrigger(_))
        ));
    }

    #[test]
    fn query_request_paper_ids_are_optional() -> Result<(), serde_json::Error> {
        let request: QueryRequest =
            serde_json::from_value(json!({"question": "what is a transformer?", "user_id": "u-1"}))?;
        assert_eq!(request.paper_ids, None);
        assert_eq!(request.top_k, None);
        Ok(())
    }

    #[test]
    fn options_load_from_partial_json() -> Result<(), serde_json::Error> {
        let options: PipelineOptions = serde_json::from_value(json!({
            "chunk_max_chars": 500,
            "embedding": {"dimensions": 512, "timeout": 1500}
        }))?;

        assert_eq!(options.chunk_max_chars, 500);
        assert_eq!(options.top_k, DEFAULT_TOP_K);
        assert_eq!(options.embedding.dimensions, 512);
        assert_eq!(options.embedding.timeout, Duration::from_millis(1500));
        assert_eq!(options.embedding.model_id, DEFAULT_EMBEDDING_MODEL);
        Ok(())
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let options = PipelineOptions {
            chunk_max_chars: 0,
            ..PipelineOptions::default()
        };
        assert!(matches!(options.validate(), Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn document_keys_follow_bucket_layout() {
        let key = DocumentKey::new("u-1", "attention");
        assert_eq!(key.pdf_object_key(), "user/u-1/papers/attention.pdf");
        assert_eq!(key.text_object_key(), "user/u-1/papers/attention.txt");
    }
}

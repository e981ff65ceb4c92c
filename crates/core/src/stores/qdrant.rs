use crate::error::VectorStoreError;
use crate::models::{DistanceMetric, MetadataFilter, StoreHit, VectorRecord};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const UPSERT_BATCH: usize = 256;
const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
    distance: DistanceMetric,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
        distance: DistanceMetric,
        request_timeout: Duration,
    ) -> Result<Self, VectorStoreError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            endpoint,
            collection: collection.into(),
            client: Client::builder().timeout(request_timeout).build()?,
            vector_size,
            distance,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, VectorStoreError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, suffix))?)
    }

    /// Creates the collection and its payload indexes when missing; fails when
    /// an existing collection has a different vector size.
    pub async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let response = self.client.get(self.collection_url("")?).send().await?;

        if response.status().is_success() {
            let parsed: Value = response.json().await?;
            let existing = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != self.vector_size => Err(VectorStoreError::Request(
                    format!(
                        "collection {} has vector size {size}, configured {}",
                        self.collection, self.vector_size
                    ),
                )),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return check_status(response, "collection lookup").await.map(|_| ());
        }

        let response = self
            .client
            .put(self.collection_url("")?)
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": self.distance.as_str(),
                }
            }))
            .send()
            .await?;
        check_status(response, "collection create").await?;

        for field in ["user_id", "paper_id"] {
            let response = self
                .client
                .put(self.collection_url("/index?wait=true")?)
                .json(&json!({ "field_name": field, "field_schema": "keyword" }))
                .send()
                .await?;
            check_status(response, "payload index create").await?;
        }

        info!(
            collection = %self.collection,
            vector_size = self.vector_size,
            distance = self.distance.as_str(),
            "created qdrant collection"
        );
        Ok(())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), VectorStoreError> {
        if vector.len() != self.vector_size {
            return Err(VectorStoreError::Request(format!(
                "vector dimension {} != collection size {}",
                vector.len(),
                self.vector_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn distance_metric(&self) -> DistanceMetric {
        self.distance
    }

    fn vector_size(&self) -> usize {
        self.vector_size
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, VectorStoreError> {
        for record in records {
            self.check_dimensions(&record.vector)?;
        }

        for batch in records.chunks(UPSERT_BATCH) {
            let points = batch.iter().map(point_json).collect::<Vec<_>>();
            let response = self
                .client
                .put(self.collection_url("/points?wait=true")?)
                .json(&json!({ "points": points }))
                .send()
                .await?;
            check_status(response, "upsert").await?;
            debug!(collection = %self.collection, points = batch.len(), "upserted batch");
        }

        Ok(records.len())
    }

    async fn delete_document(&self, user_id: &str, paper_id: &str) -> Result<(), VectorStoreError> {
        let filter = build_filter(&MetadataFilter {
            user_id: user_id.to_string(),
            paper_ids: vec![paper_id.to_string()],
        });

        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true")?)
            .json(&json!({ "filter": filter }))
            .send()
            .await?;
        check_status(response, "delete").await?;
        Ok(())
    }

    async fn query(
        &self,
        query_vector: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<StoreHit>, VectorStoreError> {
        self.check_dimensions(query_vector)?;

        let response = self
            .client
            .post(self.collection_url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "filter": build_filter(filter),
                "with_payload": true,
            }))
            .send()
            .await?;
        let parsed: Value = check_status(response, "search").await?.json().await?;

        parse_hits(&parsed, self.distance)
    }
}

async fn check_status(response: Response, action: &str) -> Result<Response, VectorStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(VectorStoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{action} returned {status}: {body}"),
    })
}

fn point_json(record: &VectorRecord) -> Value {
    json!({
        "id": record.id.to_string(),
        "vector": record.vector,
        "payload": {
            "user_id": record.metadata.user_id,
            "paper_id": record.metadata.paper_id,
            "source_text": record.metadata.source_text,
            "sequence_index": record.metadata.sequence_index,
        },
    })
}

pub fn build_filter(filter: &MetadataFilter) -> Value {
    let mut must = vec![json!({ "key": "user_id", "match": { "value": filter.user_id } })];
    if !filter.paper_ids.is_empty() {
        must.push(json!({ "key": "paper_id", "match": { "any": filter.paper_ids } }));
    }
    json!({ "must": must })
}

/// Qdrant reports a score; it is turned into a distance where smaller is
/// closer. Cosine scores are similarities in `[-1, 1]`, so `1 - score` lands
/// in `[0, 2]`.
fn score_to_distance(score: f64, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Cosine => 1.0 - score,
        DistanceMetric::Euclid => score,
        DistanceMetric::Dot => -score,
    }
}

pub fn parse_hits(parsed: &Value, metric: DistanceMetric) -> Result<Vec<StoreHit>, VectorStoreError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| VectorStoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "search response has no result array".to_string(),
        })?;

    hits.iter()
        .map(|hit| -> Result<StoreHit, VectorStoreError> {
            let id = match hit.pointer("/id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => String::new(),
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).ok_or_else(|| {
                VectorStoreError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: format!("hit {id} has no score"),
                }
            })?;

            Ok(StoreHit {
                distance: score_to_distance(score, metric),
                source_text: hit
                    .pointer("/payload/source_text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                id,
            })
        })
        .collect()
}

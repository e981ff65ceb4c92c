use crate::embeddings::Embedder;
use crate::error::{SearchError, VectorStoreError};
use crate::models::{DistanceMetric, MetadataFilter, RetrievalHit, StoreHit};
use crate::traits::VectorIndex;
use tracing::debug;

const DISTANCE_TOLERANCE: f64 = 1e-6;

/// Converts a cosine distance in `[0, 2]` into a similarity in `[-1, 1]`.
pub fn similarity_from_distance(distance: f64) -> Result<f64, SearchError> {
    if !distance.is_finite()
        || distance < -DISTANCE_TOLERANCE
        || distance > 2.0 + DISTANCE_TOLERANCE
    {
        return Err(SearchError::RetrievalProvider(
            VectorStoreError::BackendResponse {
                backend: "vector index".to_string(),
                details: format!("cosine distance {distance} outside [0, 2]"),
            },
        ));
    }
    Ok(1.0 - distance)
}

/// Keeps the store's order, numbering hits from 1 and cutting at `top_k`.
pub fn rank_hits(hits: Vec<StoreHit>, top_k: usize) -> Result<Vec<RetrievalHit>, SearchError> {
    hits.into_iter()
        .take(top_k)
        .enumerate()
        .map(|(position, hit)| -> Result<RetrievalHit, SearchError> {
            Ok(RetrievalHit {
                rank: position + 1,
                similarity: similarity_from_distance(hit.distance)?,
                text: hit.source_text.unwrap_or_default(),
            })
        })
        .collect()
}

pub struct Retriever<'a, V: ?Sized> {
    embedder: &'a Embedder,
    index: &'a V,
}

impl<'a, V> Retriever<'a, V>
where
    V: VectorIndex + ?Sized,
{
    pub fn new(embedder: &'a Embedder, index: &'a V) -> Result<Self, SearchError> {
        let metric = index.distance_metric();
        if metric != DistanceMetric::Cosine {
            return Err(SearchError::InvalidConfig(format!(
                "similarity scoring needs cosine distance, index uses {}",
                metric.as_str()
            )));
        }
        Ok(Self { embedder, index })
    }

    pub async fn retrieve(
        &self,
        question: &str,
        user_id: &str,
        paper_ids: &[String],
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>, SearchError> {
        if question.trim().is_empty() {
            return Err(SearchError::Request("question is empty".to_string()));
        }
        if top_k == 0 {
            return Err(SearchError::Request("top_k must be positive".to_string()));
        }

        let query_vector = self.embedder.embed(question).await?;

        let mut unique_papers: Vec<String> = Vec::with_capacity(paper_ids.len());
        for paper_id in paper_ids {
            if !unique_papers.contains(paper_id) {
                unique_papers.push(paper_id.clone());
            }
        }
        let filter = MetadataFilter {
            user_id: user_id.to_string(),
            paper_ids: unique_papers,
        };

        let hits = self.index.query(&query_vector, &filter, top_k).await?;
        debug!(user_id, returned = hits.len(), top_k, "vector index answered");

        rank_hits(hits, top_k)
    }
}

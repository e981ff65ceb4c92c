use crate::chunking::build_chunks;
use crate::embeddings::Embedder;
use crate::error::{IngestError, SearchError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::indexer::Indexer;
use crate::ingest::derive_document_key;
use crate::models::{
    DistanceMetric, IngestTrigger, IngestionReport, PipelineOptions, QueryRequest, QueryResponse,
};
use crate::retriever::Retriever;
use crate::traits::{EmbeddingProvider, ObjectStore, VectorIndex};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs chunk → embed → index for one document at a time and answers
/// queries. A document is either fully re-indexed or left as it was.
pub struct Pipeline<O, V> {
    options: PipelineOptions,
    objects: O,
    embedder: Embedder,
    index: V,
    extractor: Box<dyn PdfExtractor>,
}

impl<O, V> Pipeline<O, V>
where
    O: ObjectStore,
    V: VectorIndex,
{
    pub fn new(
        options: PipelineOptions,
        objects: O,
        provider: Arc<dyn EmbeddingProvider>,
        index: V,
    ) -> Result<Self, IngestError> {
        options.validate()?;

        if index.vector_size() != options.embedding.dimensions {
            return Err(IngestError::InvalidConfig(format!(
                "embedding dimensions {} do not match index vector size {}",
                options.embedding.dimensions,
                index.vector_size()
            )));
        }
        if index.distance_metric() != DistanceMetric::Cosine {
            return Err(IngestError::InvalidConfig(format!(
                "index distance {} cannot be converted to similarity; use Cosine",
                index.distance_metric().as_str()
            )));
        }

        Ok(Self {
            embedder: Embedder::new(provider, options.embedding.clone()),
            options,
            objects,
            index,
            extractor: Box::new(LopdfExtractor),
        })
    }

    pub fn with_extractor(mut self, extractor: impl PdfExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn objects(&self) -> &O {
        &self.objects
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub async fn ingest_event(&self, event: &Value) -> Result<IngestionReport, IngestError> {
        let trigger = IngestTrigger::from_event(event)
            .inspect_err(|error| error!(%error, "rejected ingestion trigger"))?;
        self.ingest(&trigger).await
    }

    pub async fn ingest(&self, trigger: &IngestTrigger) -> Result<IngestionReport, IngestError> {
        let document = trigger.document_key();
        info!(
            user_id = %document.user_id,
            paper_id = %document.paper_id,
            bucket = %trigger.text_s3_bucket,
            key = %trigger.text_s3_key,
            "ingesting document"
        );

        let bytes = self
            .objects
            .get(&trigger.text_s3_bucket, &trigger.text_s3_key)
            .await
            .inspect_err(|error| error!(%error, "failed to read document text"))?;
        let text = String::from_utf8_lossy(&bytes);
        let text_length = text.chars().count();

        let chunks = build_chunks(&document, &text, self.options.chunk_max_chars);
        info!(text_length, num_chunks = chunks.len(), "chunked document");
        if let (Some(first), Some(last)) = (chunks.first(), chunks.last()) {
            debug!(
                first_length = first.char_length,
                last_length = last.char_length,
                "chunk boundaries"
            );
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let vectors = self.embedder.embed_batch(&texts).await.inspect_err(|error| {
            error!(
                %error,
                paper_id = %document.paper_id,
                "embedding failed, document left unchanged in the index"
            )
        })?;

        self.index
            .delete_document(&document.user_id, &document.paper_id)
            .await
            .inspect_err(|error| error!(%error, "failed to clear previous records"))?;
        let records_written = match Indexer::new(&self.index)
            .upsert(&document, &chunks, &vectors)
            .await
        {
            Ok(written) => written,
            Err(error) => {
                error!(%error, paper_id = %document.paper_id, "failed to write records, rolling back");
                if let Err(cleanup) = self
                    .index
                    .delete_document(&document.user_id, &document.paper_id)
                    .await
                {
                    error!(
                        error = %cleanup,
                        paper_id = %document.paper_id,
                        "rollback failed, document may be partially indexed"
                    );
                }
                return Err(error);
            }
        };

        info!(
            user_id = %document.user_id,
            paper_id = %document.paper_id,
            records_written,
            "document indexed"
        );

        Ok(IngestionReport {
            user_id: document.user_id,
            paper_id: document.paper_id,
            text_length,
            text_checksum: format!("{:x}", Sha256::digest(&bytes)),
            num_chunks: chunks.len(),
            records_written,
            chunk_max_chars: self.options.chunk_max_chars,
            ingested_at: Utc::now(),
        })
    }

    /// Extracts the text of an uploaded PDF, stores it in the text bucket and
    /// returns the trigger for [`Pipeline::ingest`].
    pub async fn index_pdf(&self, bucket: &str, key: &str) -> Result<IngestTrigger, IngestError> {
        let document = derive_document_key(key)?;
        info!(bucket, key, user_id = %document.user_id, paper_id = %document.paper_id, "extracting pdf");

        let pdf = self.objects.get(bucket, key).await?;
        let text = self
            .extractor
            .extract_text(&pdf)
            .inspect_err(|error| error!(%error, key, "pdf extraction failed"))?;
        if text.trim().is_empty() {
            warn!(key, "extracted text is empty");
        }

        let text_key = document.text_object_key();
        self.objects
            .put(&self.options.text_bucket, &text_key, text.as_bytes())
            .await?;
        debug!(bucket = %self.options.text_bucket, key = %text_key, "stored extracted text");

        Ok(IngestTrigger {
            user_id: document.user_id,
            paper_id: document.paper_id,
            text_s3_bucket: self.options.text_bucket.clone(),
            text_s3_key: text_key,
        })
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, SearchError> {
        if request.user_id.trim().is_empty() {
            return Err(SearchError::Request("user_id is empty".to_string()));
        }

        let top_k = request.top_k.unwrap_or(self.options.top_k);
        let paper_ids = request.paper_ids.as_deref().unwrap_or_default();

        let hits = Retriever::new(&self.embedder, &self.index)?
            .retrieve(&request.question, &request.user_id, paper_ids, top_k)
            .await
            .inspect_err(|error| error!(%error, user_id = %request.user_id, "query failed"))?;

        info!(user_id = %request.user_id, hits = hits.len(), top_k, "query answered");
        Ok(QueryResponse { top_k_chunks: hits })
    }

    pub async fn delete_document(&self, user_id: &str, paper_id: &str) -> Result<(), IngestError> {
        self.index.delete_document(user_id, paper_id).await?;
        info!(user_id, paper_id, "document removed from index");
        Ok(())
    }
}

use crate::error::IngestError;
use crate::models::{Chunk, DocumentKey, RecordMetadata, VectorRecord};
use crate::traits::VectorIndex;
use tracing::debug;
use uuid::Uuid;

/// Stable record id for one chunk position of one document. Re-ingesting a
/// document with the same boundaries overwrites its records.
pub fn record_id(document: &DocumentKey, sequence_index: u64) -> Uuid {
    let name = format!(
        "{}:{}|{}:{}|{}",
        document.user_id.len(),
        document.user_id,
        document.paper_id.len(),
        document.paper_id,
        sequence_index
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

pub fn build_records(
    document: &DocumentKey,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<Vec<VectorRecord>, IngestError> {
    if chunks.len() != vectors.len() {
        return Err(IngestError::InputMismatch {
            chunks: chunks.len(),
            vectors: vectors.len(),
        });
    }

    Ok(chunks
        .iter()
        .zip(vectors)
        .enumerate()
        .map(|(position, (chunk, vector))| {
            let sequence_index = position as u64;
            VectorRecord {
                id: record_id(document, sequence_index),
                vector: vector.clone(),
                metadata: RecordMetadata {
                    user_id: document.user_id.clone(),
                    paper_id: document.paper_id.clone(),
                    source_text: chunk.text.clone(),
                    sequence_index,
                },
            }
        })
        .collect())
}

pub struct Indexer<'a, V: ?Sized> {
    index: &'a V,
}

impl<'a, V> Indexer<'a, V>
where
    V: VectorIndex + ?Sized,
{
    pub fn new(index: &'a V) -> Self {
        Self { index }
    }

    /// Writes one record per chunk and returns how many were written. Never
    /// deletes records left over from an earlier, longer version.
    pub async fn upsert(
        &self,
        document: &DocumentKey,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize, IngestError> {
        let records = build_records(document, chunks, vectors)?;
        if records.is_empty() {
            return Ok(0);
        }

        let written = self.index.upsert(&records).await?;
        debug!(
            user_id = %document.user_id,
            paper_id = %document.paper_id,
            written,
            "indexed chunk vectors"
        );
        Ok(written)
    }
}

pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use chunking::{build_chunks, chunk_text};
pub use embeddings::{
    extract_vector, CharacterNgramProvider, Embedder, HttpEmbeddingProvider, RESPONSE_VECTOR_FIELDS,
};
pub use error::{EmbeddingError, IngestError, SearchError, StorageError, VectorStoreError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use indexer::{build_records, record_id, Indexer};
pub use ingest::{
    derive_document_key, discover_pdf_files, ingest_folder, FolderIngestionReport, SkippedPdf,
};
pub use models::{
    Chunk, DistanceMetric, DocumentKey, EmbeddingOptions, IngestTrigger, IngestionReport,
    MetadataFilter, PipelineOptions, QueryRequest, QueryResponse, RecordMetadata, RetrievalHit,
    StoreHit, VectorRecord, DEFAULT_CHUNK_MAX_CHARS, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_TOP_K,
};
pub use orchestrator::Pipeline;
pub use retriever::{rank_hits, similarity_from_distance, Retriever};
pub use stores::{LocalObjectStore, QdrantStore};
pub use traits::{EmbeddingProvider, EmbeddingRequest, ObjectStore, VectorIndex};

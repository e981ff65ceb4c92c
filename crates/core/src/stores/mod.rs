pub mod local;
pub mod qdrant;

pub use local::LocalObjectStore;
pub use qdrant::QdrantStore;

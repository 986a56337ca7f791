pub mod local;
pub mod qdrant;

pub use local::LocalIndex;
pub use qdrant::QdrantStore;

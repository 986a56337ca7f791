pub mod chunk_store;
pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generators;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use chunk_store::ChunkStore;
pub use chunking::{normalize_whitespace, parse_tei};
pub use config::{DecodingParams, PipelinePaths, RetrievalOptions, DEFAULT_COLLECTION};
pub use context::{render_prompt, ContextAssembler};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{
    BackendError, GenerationFailure, IngestError, ResolutionError, RetrievalError,
    RetrievalFailure, ValidationError,
};
pub use extractor::{GrobidClient, DEFAULT_GROBID_URL};
pub use generators::{GeminiGenerator, OllamaGenerator};
pub use ingest::{
    chunk_folder, discover_files, embed_folder, extract_folder, index_folder, stored_dimensions,
    SkippedFile, StageReport,
};
pub use models::{
    Chunk, ChunkMetadata, ChunkType, EmbeddingRecord, GenerationResult, IndexEntry, IndexHit,
    QueryOutcome, QueryResult, RetrievalHit,
};
pub use orchestrator::AnswerOrchestrator;
pub use retrieval::RetrievalEngine;
pub use stores::{LocalIndex, QdrantStore};
pub use traits::{Generator, VectorIndex};

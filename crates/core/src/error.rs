use crate::models::ChunkType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("xml parse error: {0}")]
    Xml(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("extraction service failed: {0}")]
    Extraction(String),

    #[error("{metadata} metadata entries but {embeddings} embeddings for {base_name}")]
    LengthMismatch {
        base_name: String,
        metadata: usize,
        embeddings: usize,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<quick_xml::Error> for IngestError {
    fn from(value: quick_xml::Error) -> Self {
        Self::Xml(value.to_string())
    }
}

/// Failure talking to an external backend (embedding model, vector store,
/// generation model).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response from {backend}: {details}")]
    Malformed { backend: String, details: String },

    #[error("vector dimension {actual} does not match {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("request rejected: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query is empty")]
    EmptyQuery,
}

/// Why a chunk's text could not be located. Cloneable so that a cached
/// failure replays the same value on every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("'source_file' missing in metadata")]
    MissingSourceFile,

    #[error("chunks file '{file}' not found")]
    FileNotFound { file: String },

    #[error("could not decode chunks file '{file}': {details}")]
    Unparsable { file: String, details: String },

    #[error("chunks file '{file}' is empty")]
    EmptyFile { file: String },

    #[error(
        "matching chunk not found (index: {}, type: {})",
        display_index(.paragraph_index),
        display_type(.chunk_type)
    )]
    NoMatch {
        chunk_type: Option<ChunkType>,
        paragraph_index: Option<usize>,
    },
}

fn display_index(index: &Option<usize>) -> String {
    index.map_or_else(|| "N/A".to_string(), |value| value.to_string())
}

fn display_type(chunk_type: &Option<ChunkType>) -> &'static str {
    chunk_type.as_ref().map_or("N/A", ChunkType::as_str)
}

#[derive(Debug, Error)]
pub enum RetrievalFailure {
    #[error("query embedding failed: {0}")]
    Embedding(#[source] BackendError),

    #[error("vector store query failed: {0}")]
    VectorStore(#[source] BackendError),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Failed(#[from] RetrievalFailure),
}

#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("generation request to {backend} timed out")]
    Timeout { backend: String },

    #[error("could not reach {backend}: {source}")]
    Transport {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned {status}: {details}")]
    Backend {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("malformed response from {backend}: {details}")]
    MalformedResponse { backend: String, details: String },
}

impl GenerationFailure {
    pub fn from_transport(backend: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                backend: backend.to_string(),
            }
        } else {
            Self::Transport {
                backend: backend.to_string(),
                source: error,
            }
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

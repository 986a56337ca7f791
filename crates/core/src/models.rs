use crate::error::ResolutionError;
use serde::{Deserialize, Serialize};

/// Prefix every rendered resolution failure carries, so callers that only
/// see display strings can still tell a marker from real text.
pub const ERROR_MARKER_PREFIX: &str = "Error:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Abstract,
    Paragraph,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Abstract => "abstract",
            ChunkType::Paragraph => "paragraph",
        }
    }
}

/// Identifies a chunk within its source document.
///
/// `source_file` and `chunk_type` are optional so that drifted metadata
/// coming back from a vector store still deserializes; resolution reports
/// what is missing instead of failing the whole query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph_index: Option<usize>,
}

impl ChunkMetadata {
    pub fn abstract_of(source_file: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_file: Some(source_file.into()),
            title: title.into(),
            chunk_type: Some(ChunkType::Abstract),
            paragraph_index: None,
        }
    }

    pub fn paragraph(
        source_file: impl Into<String>,
        title: impl Into<String>,
        paragraph_index: usize,
    ) -> Self {
        Self {
            source_file: Some(source_file.into()),
            title: title.into(),
            chunk_type: Some(ChunkType::Paragraph),
            paragraph_index: Some(paragraph_index),
        }
    }

    pub fn source_label(&self) -> &str {
        self.source_file.as_deref().unwrap_or("Unknown Source")
    }

    pub fn paragraph_label(&self) -> String {
        self.paragraph_index
            .map_or_else(|| "N/A".to_string(), |index| index.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk's vector plus the metadata needed to find its text again.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl IndexEntry {
    /// Stable id for the chunk at `position` of `source_file`, so re-indexing
    /// unchanged inputs overwrites instead of duplicating.
    pub fn chunk_id(source_file: &str, position: usize) -> String {
        format!("{source_file}_chunk_{position}")
    }
}

/// Raw nearest-neighbour result as returned by a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub distance: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    /// 1-based, in the order the vector index returned.
    pub rank: usize,
    pub id: String,
    pub distance: f32,
    pub metadata: ChunkMetadata,
    pub text: Result<String, ResolutionError>,
}

impl RetrievalHit {
    pub fn is_resolved(&self) -> bool {
        self.text.is_ok()
    }

    /// Text for presentation; failures are rendered as an `Error:` marker.
    pub fn display_text(&self) -> String {
        match &self.text {
            Ok(text) => text.clone(),
            Err(error) => format!("{ERROR_MARKER_PREFIX} {error}"),
        }
    }
}

pub fn is_error_marker(text: &str) -> bool {
    text.starts_with(ERROR_MARKER_PREFIX)
}

/// Terminal state of one pass through the answer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOutcome {
    Rejected,
    NoHits,
    Answered,
    Refused,
    Failed,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<RetrievalHit>,
    pub outcome: QueryOutcome,
}

impl QueryResult {
    pub fn new(
        outcome: QueryOutcome,
        answer: impl Into<String>,
        sources: Vec<RetrievalHit>,
    ) -> Self {
        Self {
            answer: answer.into(),
            sources,
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: String,
    pub refused: bool,
}

impl GenerationResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            refused: false,
        }
    }

    pub fn refusal(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            refused: true,
        }
    }
}

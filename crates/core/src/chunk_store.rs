use crate::chunking::chunk_file_name;
use crate::error::ResolutionError;
use crate::models::{Chunk, ChunkMetadata};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// What the cache remembers about one chunk file. Failures are cached too,
/// so a missing or corrupt file is read from disk only once.
#[derive(Debug, Clone)]
enum CachedDocument {
    Loaded(Arc<Vec<Chunk>>),
    Failed(ResolutionError),
}

/// Authoritative store of chunk text, one JSON file per source document.
pub struct ChunkStore {
    chunks_dir: PathBuf,
    cache: RwLock<HashMap<PathBuf, CachedDocument>>,
}

impl ChunkStore {
    pub fn new(chunks_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunks_dir: chunks_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Finds the text of the chunk described by `metadata`.
    ///
    /// Matching first compares `(chunk_type, paragraph_index)` within the
    /// document's chunk file; if that finds nothing, it falls back to full
    /// metadata equality. The fallback is weaker when metadata is incomplete
    /// and is kept as a last resort only.
    pub async fn resolve(&self, metadata: &ChunkMetadata) -> Result<String, ResolutionError> {
        let source_file = metadata
            .source_file
            .as_deref()
            .ok_or(ResolutionError::MissingSourceFile)?;

        let chunks = self.document(source_file).await?;

        let primary = metadata.chunk_type.and_then(|chunk_type| {
            chunks.iter().find(|chunk| {
                chunk.metadata.chunk_type == Some(chunk_type)
                    && chunk.metadata.paragraph_index == metadata.paragraph_index
            })
        });

        primary
            .or_else(|| chunks.iter().find(|chunk| &chunk.metadata == metadata))
            .map(|chunk| chunk.text.clone())
            .ok_or(ResolutionError::NoMatch {
                chunk_type: metadata.chunk_type,
                paragraph_index: metadata.paragraph_index,
            })
    }

    async fn document(&self, source_file: &str) -> Result<Arc<Vec<Chunk>>, ResolutionError> {
        let file_name = chunk_file_name(source_file);
        let path = self.chunks_dir.join(&file_name);

        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
            .cloned();

        let entry = match cached {
            Some(entry) => entry,
            None => {
                let loaded = load_document(&path, &file_name).await;
                let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
                // First write wins if another caller loaded the file meanwhile.
                cache.entry(path).or_insert(loaded).clone()
            }
        };

        match entry {
            CachedDocument::Loaded(chunks) => Ok(chunks),
            CachedDocument::Failed(error) => Err(error),
        }
    }
}

async fn load_document(path: &Path, file_name: &str) -> CachedDocument {
    debug!(path = %path.display(), "loading chunk file");

    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return CachedDocument::Failed(ResolutionError::FileNotFound {
                file: file_name.to_string(),
            });
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "could not read chunk file");
            return CachedDocument::Failed(ResolutionError::Unparsable {
                file: file_name.to_string(),
                details: error.to_string(),
            });
        }
    };

    match serde_json::from_str::<Vec<Chunk>>(&raw) {
        Ok(chunks) if chunks.is_empty() => CachedDocument::Failed(ResolutionError::EmptyFile {
            file: file_name.to_string(),
        }),
        Ok(chunks) => CachedDocument::Loaded(Arc::new(chunks)),
        Err(error) => {
            warn!(path = %path.display(), %error, "could not decode chunk file");
            CachedDocument::Failed(ResolutionError::Unparsable {
                file: file_name.to_string(),
                details: error.to_string(),
            })
        }
    }
}

use crate::chunk_store::ChunkStore;
use crate::embeddings::Embedder;
use crate::error::{RetrievalError, RetrievalFailure, ValidationError};
use crate::models::RetrievalHit;
use crate::traits::VectorIndex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

pub fn validate_query(query: &str) -> Result<&str, ValidationError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyQuery)
    } else {
        Ok(trimmed)
    }
}

/// Embeds a query, asks the vector index for neighbours and resolves each
/// hit's text from the chunk store.
pub struct RetrievalEngine<E, V> {
    embedder: E,
    index: V,
    chunks: Arc<ChunkStore>,
}

impl<E, V> RetrievalEngine<E, V>
where
    E: Embedder,
    V: VectorIndex,
{
    pub fn new(embedder: E, index: V, chunks: Arc<ChunkStore>) -> Self {
        Self {
            embedder,
            index,
            chunks,
        }
    }

    /// Hits are ranked in the order the index returned them; the engine does
    /// not re-sort. Text that cannot be resolved is kept on the hit as an
    /// error instead of failing the query.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, RetrievalError> {
        let query = validate_query(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let vector = self.embedder.encode(query).await.map_err(|cause| {
            error!(error = %cause, "query embedding failed");
            RetrievalFailure::Embedding(cause)
        })?;

        let mut hits = self.index.query(&vector, k).await.map_err(|cause| {
            error!(error = %cause, "vector store query failed");
            RetrievalFailure::VectorStore(cause)
        })?;
        hits.truncate(k);

        if hits
            .windows(2)
            .any(|pair| pair[0].distance > pair[1].distance)
        {
            warn!("vector store returned hits out of distance order; keeping store order");
        }

        let mut resolved = Vec::with_capacity(hits.len());
        for (position, hit) in hits.into_iter().enumerate() {
            let text = self.chunks.resolve(&hit.metadata).await;
            if let Err(cause) = &text {
                warn!(id = %hit.id, error = %cause, "chunk text unresolved");
            }
            resolved.push(RetrievalHit {
                rank: position + 1,
                id: hit.id,
                distance: hit.distance,
                metadata: hit.metadata,
                text,
            });
        }

        debug!(
            hits = resolved.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval finished"
        );
        Ok(resolved)
    }
}

use crate::error::{BackendError, GenerationFailure};
use crate::models::{ChunkMetadata, GenerationResult, IndexHit};
use async_trait::async_trait;

/// Nearest-neighbour store over chunk vectors. The distance metric is cosine
/// distance and is fixed when the collection is created.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Bulk upsert. The three slices must have the same length; re-adding an
    /// existing id overwrites it.
    async fn add(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), BackendError>;

    /// At most `k` hits, ascending by distance. Empty when the index is empty.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, BackendError>;

    async fn count(&self) -> Result<usize, BackendError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationFailure>;
}

#[async_trait]
impl<T: VectorIndex + ?Sized> VectorIndex for Box<T> {
    async fn add(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), BackendError> {
        (**self).add(ids, vectors, metadatas).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, BackendError> {
        (**self).query(vector, k).await
    }

    async fn count(&self) -> Result<usize, BackendError> {
        (**self).count().await
    }
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationFailure> {
        (**self).generate(prompt).await
    }
}

pub(crate) fn check_add_lengths(
    ids: &[String],
    vectors: &[Vec<f32>],
    metadatas: &[ChunkMetadata],
) -> Result<(), BackendError> {
    if ids.len() != vectors.len() || ids.len() != metadatas.len() {
        return Err(BackendError::Request(format!(
            "{} ids, {} vectors and {} metadata entries must have equal length",
            ids.len(),
            vectors.len(),
            metadatas.len()
        )));
    }
    Ok(())
}

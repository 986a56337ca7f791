use crate::error::BackendError;
use crate::models::{ChunkMetadata, IndexEntry, IndexHit};
use crate::traits::{check_add_lengths, VectorIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

pub const COSINE_METRIC: &str = "cosine";

pub fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

/// `1 - cos(a, b)`; a zero vector is treated as orthogonal to everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(left, right)| left * right).sum();
    let norms = magnitude(a) * magnitude(b);
    if norms == 0.0 {
        return 1.0;
    }
    1.0 - dot / norms
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    name: String,
    metric: String,
    dimensions: Option<usize>,
    entries: Vec<IndexEntry>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl Collection {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            metric: COSINE_METRIC.to_string(),
            ..Self::default()
        }
    }

    fn reindex_positions(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id.clone(), position))
            .collect();
    }

    fn check_dimensions(&self, actual: usize) -> Result<(), BackendError> {
        match self.dimensions {
            Some(expected) if expected != actual => {
                Err(BackendError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    fn upsert(&mut self, entry: IndexEntry) {
        match self.positions.get(&entry.id) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

/// Brute-force cosine index persisted as one JSON file per collection.
pub struct LocalIndex {
    path: Option<PathBuf>,
    collection: RwLock<Collection>,
}

impl LocalIndex {
    pub fn in_memory(name: &str) -> Self {
        Self {
            path: None,
            collection: RwLock::new(Collection::empty(name)),
        }
    }

    /// Opens `<dir>/<name>.json`, starting an empty collection if it does not
    /// exist yet.
    pub fn open(dir: &Path, name: &str) -> Result<Self, BackendError> {
        let path = dir.join(format!("{name}.json"));

        let collection = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let mut loaded: Collection = serde_json::from_str(&raw)?;
            if loaded.metric != COSINE_METRIC {
                return Err(BackendError::Request(format!(
                    "collection '{}' was created with metric '{}', expected '{}'",
                    name, loaded.metric, COSINE_METRIC
                )));
            }
            loaded.reindex_positions();
            loaded
        } else {
            Collection::empty(name)
        };

        Ok(Self {
            path: Some(path),
            collection: RwLock::new(collection),
        })
    }

    fn persist(&self, collection: &Collection) -> Result<(), BackendError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(collection)?)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn add(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), BackendError> {
        check_add_lengths(ids, vectors, metadatas)?;
        if ids.is_empty() {
            return Ok(());
        }

        let mut collection = self
            .collection
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let expected = collection.dimensions.unwrap_or(vectors[0].len());
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(BackendError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        // Memory only changes once the new state is on disk.
        let mut updated = collection.clone();
        updated.dimensions = Some(expected);
        for ((id, vector), metadata) in ids.iter().zip(vectors).zip(metadatas) {
            updated.upsert(IndexEntry {
                id: id.clone(),
                vector: vector.clone(),
                metadata: metadata.clone(),
            });
        }

        self.persist(&updated)?;
        *collection = updated;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, BackendError> {
        let collection = self
            .collection
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        if collection.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        collection.check_dimensions(vector.len())?;

        let mut scored: Vec<(f32, &IndexEntry)> = collection
            .entries
            .iter()
            .map(|entry| (cosine_distance(vector, &entry.vector), entry))
            .collect();
        scored.sort_by(|left, right| left.0.total_cmp(&right.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, entry)| IndexHit {
                id: entry.id.clone(),
                distance,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, BackendError> {
        Ok(self
            .collection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(index: usize) -> ChunkMetadata {
        ChunkMetadata::paragraph("a.pdf", "A", index)
    }

    #[tokio::test]
    async fn query_orders_by_ascending_distance() -> Result<(), BackendError> {
        let index = LocalIndex::in_memory("papers");
        index
            .add(
                &["far".to_string(), "near".to_string(), "mid".to_string()],
                &[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
                &[meta(0), meta(1), meta(2)],
            )
            .await?;

        let hits = index.query(&[1.0, 0.1], 2).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "mid");
        assert!(hits[0].distance <= hits[1].distance);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() -> Result<(), BackendError> {
        let index = LocalIndex::in_memory("papers");
        assert!(index.query(&[1.0, 0.0], 5).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn re_adding_an_id_overwrites() -> Result<(), BackendError> {
        let index = LocalIndex::in_memory("papers");
        let ids = ["a.pdf_chunk_0".to_string()];
        index.add(&ids, &[vec![1.0, 0.0]], &[meta(0)]).await?;
        index.add(&ids, &[vec![0.0, 1.0]], &[meta(7)]).await?;

        assert_eq!(index.count().await?, 1);
        let hits = index.query(&[0.0, 1.0], 1).await?;
        assert_eq!(hits[0].metadata.paragraph_index, Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let index = LocalIndex::in_memory("papers");
        let result = index
            .add(&["only-id".to_string()], &[], &[meta(0)])
            .await;
        assert!(matches!(result, Err(BackendError::Request(_))));
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_add() -> Result<(), BackendError> {
        let index = LocalIndex::in_memory("papers");
        index.add(&["a".to_string()], &[vec![1.0, 0.0]], &[meta(0)]).await?;
        let result = index.add(&["b".to_string()], &[vec![1.0, 0.0, 0.0]], &[meta(1)]).await;
        assert!(matches!(result, Err(BackendError::DimensionMismatch { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn collection_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        {
            let index = LocalIndex::open(dir.path(), "papers")?;
            index.add(&["a".to_string()], &[vec![0.5, 0.5]], &[meta(3)]).await?;
        }

        let reopened = LocalIndex::open(dir.path(), "papers")?;
        assert_eq!(reopened.count().await?, 1);
        reopened.add(&["a".to_string()], &[vec![0.5, 0.5]], &[meta(3)]).await?;
        assert_eq!(reopened.count().await?, 1);
        Ok(())
    }

    #[test]
    fn collection_with_another_metric_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("papers.json"),
            r#"{"name":"papers","metric":"l2","dimensions":2,"entries":[]}"#,
        )?;

        let result = LocalIndex::open(dir.path(), "papers");
        assert!(matches!(result, Err(BackendError::Request(_))));
        Ok(())
    }

    #[tokio::test]
    async fn failed_persist_leaves_index_unchanged() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = LocalIndex::open(dir.path(), "papers")?;
        index.add(&["a".to_string()], &[vec![1.0, 0.0]], &[meta(0)]).await?;

        // A directory where the collection file belongs makes the write fail.
        fs::remove_file(dir.path().join("papers.json"))?;
        fs::create_dir(dir.path().join("papers.json"))?;

        let result = index
            .add(&["b".to_string()], &[vec![0.0, 1.0]], &[meta(1)])
            .await;
        assert!(matches!(result, Err(BackendError::Io(_))));
        assert_eq!(index.count().await?, 1);
        assert_eq!(index.query(&[0.0, 1.0], 5).await?.len(), 1);
        Ok(())
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let distance = cosine_distance(&[0.3, 0.4], &[0.3, 0.4]);
        assert!(distance.abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}

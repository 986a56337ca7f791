use crate::error::BackendError;
use crate::models::{ChunkMetadata, IndexHit};
use crate::traits::{check_add_lengths, VectorIndex};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

/// Qdrant point ids must be integers or UUIDs; chunk ids are hashed into a
/// name-based UUID so the same chunk always lands on the same point.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection with cosine distance, or checks that an existing
    /// one already uses it.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<(), BackendError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            let info: Value = response.json().await?;
            let distance = info
                .pointer("/result/config/params/vectors/distance")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if distance != "Cosine" {
                return Err(BackendError::Request(format!(
                    "collection '{}' uses distance '{}', expected 'Cosine'",
                    self.collection, distance
                )));
            }
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

/// Maps a `points/search` response body to hits. Qdrant reports cosine
/// similarity, which becomes `1 - score`.
pub fn parse_search_response(parsed: &Value) -> Result<Vec<IndexHit>, BackendError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Malformed {
            backend: "qdrant".to_string(),
            details: "search response has no result array".to_string(),
        })?;

    Ok(hits.iter().map(parse_hit).collect())
}

/// A payload that does not decode leaves the hit with empty metadata; its
/// text then fails to resolve instead of failing the whole search.
fn parse_hit(hit: &Value) -> IndexHit {
    let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
    let id = payload
        .get("chunk_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| hit.pointer("/id").and_then(point_id_text))
        .unwrap_or_default();
    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

    let metadata = serde_json::from_value::<ChunkMetadata>(payload).unwrap_or_else(|error| {
        warn!(id = %id, %error, "undecodable qdrant payload");
        ChunkMetadata::default()
    });

    IndexHit {
        id,
        distance: (1.0 - score) as f32,
        metadata,
    }
}

fn point_id_text(id: &Value) -> Option<String> {
    match id {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), BackendError> {
        check_add_lengths(ids, vectors, metadatas)?;

        let points = ids
            .iter()
            .zip(vectors)
            .zip(metadatas)
            .map(|((id, vector), metadata)| {
                let mut payload = serde_json::to_value(metadata)?;
                if let Value::Object(fields) = &mut payload {
                    fields.insert("chunk_id".to_string(), Value::String(id.clone()));
                }
                Ok::<_, BackendError>(json!({
                    "id": point_id(id),
                    "vector": vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, BackendError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotReady(format!(
                "qdrant collection '{}' does not exist",
                self.collection
            )));
        }
        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_search_response(&parsed)
    }

    async fn count(&self) -> Result<usize, BackendError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| BackendError::Malformed {
                backend: "qdrant".to_string(),
                details: "count response has no result.count".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkType;

    #[test]
    fn point_ids_are_stable() {
        assert_eq!(point_id("a.pdf_chunk_1"), point_id("a.pdf_chunk_1"));
        assert_ne!(point_id("a.pdf_chunk_1"), point_id("a.pdf_chunk_2"));
    }

    #[test]
    fn search_response_maps_score_to_distance() -> Result<(), BackendError> {
        let body = json!({
            "result": [
                {
                    "id": "6a1f0c7e-0000-5000-8000-000000000000",
                    "score": 0.9,
                    "payload": {
                        "chunk_id": "a.pdf_chunk_2",
                        "source_file": "a.pdf",
                        "title": "A",
                        "chunk_type": "paragraph",
                        "paragraph_index": 1
                    }
                },
                {
                    "id": "6a1f0c7e-0000-5000-8000-000000000001",
                    "score": 0.5,
                    "payload": {
                        "chunk_id": "a.pdf_chunk_0",
                        "source_file": "a.pdf",
                        "title": "A",
                        "chunk_type": "abstract"
                    }
                }
            ]
        });

        let hits = parse_search_response(&body)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a.pdf_chunk_2");
        assert!((hits[0].distance - 0.1).abs() < 1e-6);
        assert_eq!(hits[0].metadata.paragraph_index, Some(1));
        assert_eq!(hits[1].metadata.chunk_type, Some(ChunkType::Abstract));
        Ok(())
    }

    #[test]
    fn undecodable_payloads_do_not_sink_good_hits() -> Result<(), BackendError> {
        let body = json!({
            "result": [
                {
                    "id": "u1",
                    "score": 0.8,
                    "payload": {
                        "chunk_id": "a.pdf_chunk_0",
                        "source_file": "a.pdf",
                        "title": "A",
                        "chunk_type": "abstract"
                    }
                },
                { "id": "u2", "score": 0.7, "payload": null },
                {
                    "id": 17,
                    "score": 0.6,
                    "payload": { "source_file": "a.pdf", "chunk_type": "figure" }
                }
            ]
        });

        let hits = parse_search_response(&body)?;
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].metadata.source_file.as_deref(), Some("a.pdf"));
        assert_eq!(hits[1].id, "u2");
        assert_eq!(hits[1].metadata, ChunkMetadata::default());
        assert_eq!(hits[2].id, "17");
        assert_eq!(hits[2].metadata, ChunkMetadata::default());
        Ok(())
    }

    #[test]
    fn search_response_without_result_is_malformed() {
        let result = parse_search_response(&json!({ "status": "ok" }));
        assert!(matches!(result, Err(BackendError::Malformed { .. })));
    }
}

use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";

/// Text to vector encoder. Every vector produced within one process has the
/// same length, and batches come back aligned with their input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.encode(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        (**self).encode(text).await
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        (**self).encode_batch(texts).await
    }
}

/// Hashes character trigrams into a fixed number of buckets. Deterministic
/// and offline, so it also serves as the embedder for tests and smoke runs.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Sentence embeddings served by an Ollama instance (`/api/embed`).
pub struct OllamaEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: OnceLock<usize>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, BackendError> {
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(base_url)?.join("/api/embed")?,
            model: model.into(),
            dimensions: OnceLock::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Length of the vectors seen so far, once the first batch has come back.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    fn check_batch(&self, requested: usize, vectors: &[Vec<f32>]) -> Result<(), BackendError> {
        if vectors.len() != requested {
            return Err(BackendError::Malformed {
                backend: "ollama".to_string(),
                details: format!("{} embeddings for {} inputs", vectors.len(), requested),
            });
        }

        for vector in vectors {
            let expected = *self.dimensions.get_or_init(|| vector.len());
            if vector.len() != expected {
                return Err(BackendError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vectors = self.encode_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| BackendError::Malformed {
            backend: "ollama".to_string(),
            details: "empty embedding list".to_string(),
        })
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        self.check_batch(texts.len(), &parsed.embeddings)?;
        Ok(parsed.embeddings)
    }
}

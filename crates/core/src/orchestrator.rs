use crate::context::{render_prompt, ContextAssembler};
use crate::embeddings::Embedder;
use crate::error::{RetrievalError, ValidationError};
use crate::models::{QueryOutcome, QueryResult};
use crate::retrieval::RetrievalEngine;
use crate::traits::{Generator, VectorIndex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub use crate::generators::SAFETY_REFUSAL_MESSAGE;

pub const EMPTY_QUERY_MESSAGE: &str = "Please enter a question.";
pub const NO_HITS_MESSAGE: &str = "No relevant passages found.";
pub const PROCESSING_ERROR_MESSAGE: &str = "An error occurred while processing the query.";

/// Runs one question through retrieval, context assembly and generation.
///
/// Every path ends in a [`QueryResult`]; nothing below this boundary is
/// retried, and no failure propagates to the caller as an error.
pub struct AnswerOrchestrator<E, V, G> {
    retrieval: RetrievalEngine<E, V>,
    generator: G,
    assembler: ContextAssembler,
    top_k: usize,
}

impl<E, V, G> AnswerOrchestrator<E, V, G>
where
    E: Embedder,
    V: VectorIndex,
    G: Generator,
{
    pub fn new(retrieval: RetrievalEngine<E, V>, generator: G, top_k: usize) -> Self {
        Self {
            retrieval,
            generator,
            assembler: ContextAssembler,
            top_k,
        }
    }

    pub async fn answer(&self, query: &str) -> QueryResult {
        let sources = match self.retrieval.retrieve(query, self.top_k).await {
            Ok(hits) => hits,
            Err(RetrievalError::Invalid(ValidationError::EmptyQuery)) => {
                return QueryResult::new(QueryOutcome::Rejected, EMPTY_QUERY_MESSAGE, Vec::new());
            }
            Err(RetrievalError::Failed(failure)) => {
                error!(error = %failure, "retrieval failed");
                return QueryResult::new(
                    QueryOutcome::Failed,
                    PROCESSING_ERROR_MESSAGE,
                    Vec::new(),
                );
            }
        };

        if sources.is_empty() {
            info!("no relevant passages for query");
            return QueryResult::new(QueryOutcome::NoHits, NO_HITS_MESSAGE, Vec::new());
        }

        let context = self.assembler.assemble(&sources);
        let prompt = render_prompt(&context, query.trim());

        let started = Instant::now();
        let generated = self.generator.generate(&prompt).await;
        debug!(
            backend = self.generator.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation finished"
        );

        match generated {
            Ok(result) if result.refused => {
                warn!(backend = self.generator.name(), "generation refused");
                QueryResult::new(QueryOutcome::Refused, SAFETY_REFUSAL_MESSAGE, sources)
            }
            Ok(result) => QueryResult::new(QueryOutcome::Answered, result.text.trim(), sources),
            Err(failure) => {
                error!(backend = self.generator.name(), error = %failure, "generation failed");
                let answer = format!(
                    "Error generating the answer with {}: {failure}",
                    self.generator.name()
                );
                QueryResult::new(QueryOutcome::Failed, answer, sources)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::chunking::write_chunk_file;
    use crate::config::DecodingParams;
    use crate::error::{BackendError, GenerationFailure};
    use crate::generators::OllamaGenerator;
    use crate::models::{Chunk, ChunkMetadata, GenerationResult, IndexHit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::{tempdir, TempDir};

    #[derive(Clone, Default)]
    struct Calls {
        embed: Arc<AtomicUsize>,
        query: Arc<AtomicUsize>,
        generate: Arc<AtomicUsize>,
    }

    struct FakeEmbedder {
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn encode(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            self.calls.embed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BackendError::NotReady("model not loaded".to_string()));
            }
            Ok(vec![1.0, 0.0])
        }
    }

    struct FakeIndex {
        calls: Calls,
        hits: Vec<IndexHit>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn add(
            &self,
            _ids: &[String],
            _vectors: &[Vec<f32>],
            _metadatas: &[ChunkMetadata],
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<IndexHit>, BackendError> {
            self.calls.query.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.iter().take(k).cloned().collect())
        }

        async fn count(&self) -> Result<usize, BackendError> {
            Ok(self.hits.len())
        }
    }

    enum Reply {
        Text(&'static str),
        Refuse,
        Unreachable,
    }

    struct FakeGenerator {
        calls: Calls,
        reply: Reply,
        last_prompt: Arc<Mutex<String>>,
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationFailure> {
            self.calls.generate.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut last) = self.last_prompt.lock() {
                *last = prompt.to_string();
            }
            match self.reply {
                Reply::Text(text) => Ok(GenerationResult::text(text)),
                Reply::Refuse => Ok(GenerationResult::refusal("blocked")),
                Reply::Unreachable => Err(GenerationFailure::Backend {
                    backend: "fake".to_string(),
                    status: 503,
                    details: "connection refused".to_string(),
                }),
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        calls: Calls,
        last_prompt: Arc<Mutex<String>>,
        orchestrator: AnswerOrchestrator<FakeEmbedder, FakeIndex, FakeGenerator>,
    }

    fn chunk_dir() -> Result<TempDir, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_chunk_file(
            &dir.path().join("a_chunks.json"),
            &[
                Chunk {
                    text: "CAR T cells persisted for six months.".to_string(),
                    metadata: ChunkMetadata::paragraph("a.pdf", "A", 1),
                },
                Chunk {
                    text: "Relapse was rare.".to_string(),
                    metadata: ChunkMetadata::paragraph("a.pdf", "A", 2),
                },
            ],
        )?;
        Ok(dir)
    }

    fn harness(
        hits: Vec<IndexHit>,
        reply: Reply,
        embed_fails: bool,
    ) -> Result<Harness, Box<dyn std::error::Error>> {
        let dir = chunk_dir()?;
        let calls = Calls::default();
        let last_prompt = Arc::new(Mutex::new(String::new()));
        let retrieval = RetrievalEngine::new(
            FakeEmbedder {
                calls: calls.clone(),
                fail: embed_fails,
            },
            FakeIndex {
                calls: calls.clone(),
                hits,
            },
            Arc::new(ChunkStore::new(dir.path())),
        );
        let generator = FakeGenerator {
            calls: calls.clone(),
            reply,
            last_prompt: last_prompt.clone(),
        };

        Ok(Harness {
            _dir: dir,
            calls,
            last_prompt,
            orchestrator: AnswerOrchestrator::new(retrieval, generator, 3),
        })
    }

    fn two_hits() -> Vec<IndexHit> {
        vec![
            IndexHit {
                id: "a.pdf_chunk_1".to_string(),
                distance: 0.12,
                metadata: ChunkMetadata::paragraph("a.pdf", "A", 1),
            },
            IndexHit {
                id: "a.pdf_chunk_7".to_string(),
                distance: 0.4,
                metadata: ChunkMetadata::paragraph("a.pdf", "A", 7),
            },
        ]
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_external_calls(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(two_hits(), Reply::Text("unused"), false)?;

        for query in ["", "   \t"] {
            let result = harness.orchestrator.answer(query).await;
            assert_eq!(result.outcome, QueryOutcome::Rejected);
            assert_eq!(result.answer, EMPTY_QUERY_MESSAGE);
            assert!(result.sources.is_empty());
        }

        assert_eq!(harness.calls.embed.load(Ordering::SeqCst), 0);
        assert_eq!(harness.calls.query.load(Ordering::SeqCst), 0);
        assert_eq!(harness.calls.generate.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn zero_hits_give_fixed_message() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(Vec::new(), Reply::Text("unused"), false)?;
        let result = harness.orchestrator.answer("What persisted?").await;

        assert_eq!(result.outcome, QueryOutcome::NoHits);
        assert_eq!(result.answer, NO_HITS_MESSAGE);
        assert!(result.sources.is_empty());
        assert_eq!(harness.calls.generate.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn answer_is_trimmed_and_sources_ranked() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(two_hits(), Reply::Text("  Six months.\n"), false)?;
        let result = harness.orchestrator.answer("How long did cells persist?").await;

        assert_eq!(result.outcome, QueryOutcome::Answered);
        assert_eq!(result.answer, "Six months.");
        assert_eq!(result.sources.len(), 2);
        assert!(result.sources.len() <= 3);
        assert!(result
            .sources
            .windows(2)
            .all(|pair| pair[0].distance <= pair[1].distance && pair[0].rank < pair[1].rank));

        // The unresolved second hit is still a source, but its resolver error
        // never reaches the prompt.
        assert!(result.sources[1].text.is_err());
        let prompt = harness.last_prompt.lock().map(|p| p.clone()).unwrap_or_default();
        assert!(prompt.contains("CAR T cells persisted for six months."));
        assert!(prompt.contains("[Error loading text]"));
        assert!(prompt.contains("Question: How long did cells persist?"));
        Ok(())
    }

    #[tokio::test]
    async fn refusal_keeps_sources() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(two_hits(), Reply::Refuse, false)?;
        let result = harness.orchestrator.answer("Anything?").await;

        assert_eq!(result.outcome, QueryOutcome::Refused);
        assert_eq!(result.answer, SAFETY_REFUSAL_MESSAGE);
        assert_eq!(result.sources.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn generation_failure_reports_cause_and_keeps_sources(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(two_hits(), Reply::Unreachable, false)?;
        let result = harness.orchestrator.answer("Anything?").await;

        assert_eq!(result.outcome, QueryOutcome::Failed);
        assert!(result.answer.contains("connection refused"));
        assert_eq!(result.sources.len(), 2);
        assert_eq!(harness.calls.generate.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_generator_keeps_sources() -> Result<(), Box<dyn std::error::Error>> {
        let dir = chunk_dir()?;
        let calls = Calls::default();
        let retrieval = RetrievalEngine::new(
            FakeEmbedder {
                calls: calls.clone(),
                fail: false,
            },
            FakeIndex {
                calls: calls.clone(),
                hits: two_hits(),
            },
            Arc::new(ChunkStore::new(dir.path())),
        );
        let generator =
            OllamaGenerator::new("http://127.0.0.1:1", "llama3:8b", DecodingParams::default())?;
        let orchestrator = AnswerOrchestrator::new(retrieval, generator, 3);

        let result = orchestrator.answer("How long did cells persist?").await;
        assert_eq!(result.outcome, QueryOutcome::Failed);
        assert!(result
            .answer
            .starts_with("Error generating the answer with ollama: could not reach ollama"));
        assert_eq!(result.sources.len(), 2);
        assert_eq!(
            result.sources[0].text.as_deref(),
            Ok("CAR T cells persisted for six months.")
        );
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_failure_is_generic_and_not_retried(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness(two_hits(), Reply::Text("unused"), true)?;
        let result = harness.orchestrator.answer("Anything?").await;

        assert_eq!(result.outcome, QueryOutcome::Failed);
        assert_eq!(result.answer, PROCESSING_ERROR_MESSAGE);
        assert!(result.sources.is_empty());
        assert_eq!(harness.calls.embed.load(Ordering::SeqCst), 1);
        assert_eq!(harness.calls.query.load(Ordering::SeqCst), 0);
        assert_eq!(harness.calls.generate.load(Ordering::SeqCst), 0);
        Ok(())
    }
}

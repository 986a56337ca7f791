use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use paper_qa_core::embeddings::DEFAULT_EMBEDDING_MODEL;
use paper_qa_core::generators::gemini::{DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_URL};
use paper_qa_core::generators::ollama::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use paper_qa_core::{
    chunk_folder, embed_folder, extract_folder, index_folder, stored_dimensions,
    AnswerOrchestrator, CharacterNgramEmbedder, ChunkStore, DecodingParams, Embedder,
    GeminiGenerator, Generator, GrobidClient, LocalIndex, OllamaEmbedder, OllamaGenerator,
    PipelinePaths, QdrantStore, QueryResult, RetrievalEngine, RetrievalHit, RetrievalOptions,
    StageReport, VectorIndex, DEFAULT_COLLECTION, DEFAULT_GROBID_URL,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXCERPT_CHARS: usize = 500;

type DynOrchestrator =
    AnswerOrchestrator<Box<dyn Embedder>, Box<dyn VectorIndex>, Box<dyn Generator>>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IndexBackend {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderBackend {
    Ollama,
    Ngram,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GeneratorBackend {
    Ollama,
    Gemini,
}

#[derive(Parser)]
#[command(name = "paper-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder with the input PDFs
    #[arg(long, env = "PAPER_QA_PDF_DIR", global = true,
          default_value_os_t = PipelinePaths::default().pdf_dir)]
    pdf_dir: PathBuf,

    /// Folder for extracted TEI XML
    #[arg(long, env = "PAPER_QA_XML_DIR", global = true,
          default_value_os_t = PipelinePaths::default().xml_dir)]
    xml_dir: PathBuf,

    /// Folder for chunk files
    #[arg(long, env = "PAPER_QA_CHUNKS_DIR", global = true,
          default_value_os_t = PipelinePaths::default().chunks_dir)]
    chunks_dir: PathBuf,

    /// Folder for embedding files
    #[arg(long, env = "PAPER_QA_EMBEDDINGS_DIR", global = true,
          default_value_os_t = PipelinePaths::default().embeddings_dir)]
    embeddings_dir: PathBuf,

    /// Folder for the local vector index
    #[arg(long, env = "PAPER_QA_INDEX_DIR", global = true,
          default_value_os_t = PipelinePaths::default().index_dir)]
    index_dir: PathBuf,

    /// Vector collection name
    #[arg(long, env = "PAPER_QA_COLLECTION", default_value = DEFAULT_COLLECTION, global = true)]
    collection: String,

    #[arg(long, env = "PAPER_QA_INDEX_BACKEND", value_enum, default_value = "local", global = true)]
    index_backend: IndexBackend,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    #[arg(long, env = "PAPER_QA_EMBEDDER", value_enum, default_value = "ollama", global = true)]
    embedder: EmbedderBackend,

    /// Ollama embedding model
    #[arg(long, env = "PAPER_QA_EMBEDDING_MODEL", global = true,
          default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_URL, global = true)]
    ollama_url: String,

    #[arg(long, env = "PAPER_QA_GENERATOR", value_enum, default_value = "ollama", global = true)]
    generator: GeneratorBackend,

    /// Ollama chat model
    #[arg(long, env = "PAPER_QA_OLLAMA_MODEL", default_value = DEFAULT_OLLAMA_MODEL, global = true)]
    ollama_model: String,

    #[arg(long, env = "PAPER_QA_GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL, global = true)]
    gemini_model: String,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, global = true)]
    gemini_api_key: Option<String>,

    /// Grobid base URL
    #[arg(long, env = "GROBID_URL", default_value = DEFAULT_GROBID_URL, global = true)]
    grobid_url: String,

    #[arg(long, env = "PAPER_QA_TEMPERATURE", global = true,
          default_value_t = DecodingParams::default().temperature)]
    temperature: f32,

    #[arg(long, env = "PAPER_QA_MAX_OUTPUT_TOKENS", global = true,
          default_value_t = DecodingParams::default().max_output_tokens)]
    max_output_tokens: u32,

    /// Passages retrieved per question
    #[arg(long, env = "PAPER_QA_TOP_K", global = true,
          default_value_t = RetrievalOptions::default().top_k)]
    top_k: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Send every PDF through Grobid and store the TEI XML.
    Extract,
    /// Split extracted XML into abstract and paragraph chunks.
    Chunk,
    /// Embed every chunk file.
    Embed,
    /// Add stored embeddings to the vector index.
    Index,
    /// Run extract, chunk, embed and index in order.
    Ingest,
    /// Retrieve passages without generating an answer.
    Search {
        #[arg(long)]
        query: String,
    },
    /// Answer one question with cited sources.
    Ask {
        #[arg(long)]
        query: String,
    },
    /// Ask questions interactively; `exit` quits.
    Chat,
    /// Check Grobid, Ollama and the vector index.
    Doctor,
}

impl Cli {
    fn decoding(&self) -> DecodingParams {
        DecodingParams {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    fn build_embedder(&self) -> anyhow::Result<Box<dyn Embedder>> {
        Ok(match self.embedder {
            EmbedderBackend::Ollama => {
                Box::new(OllamaEmbedder::new(&self.ollama_url, &self.embedding_model)?)
            }
            EmbedderBackend::Ngram => Box::new(CharacterNgramEmbedder::default()),
        })
    }

    /// Qdrant collections are created on first index, sized from the stored
    /// vectors; queries against a missing collection surface as not ready.
    async fn build_index(
        &self,
        vector_size: Option<usize>,
    ) -> anyhow::Result<Box<dyn VectorIndex>> {
        Ok(match self.index_backend {
            IndexBackend::Local => Box::new(LocalIndex::open(&self.index_dir, &self.collection)?),
            IndexBackend::Qdrant => {
                let store = QdrantStore::new(&self.qdrant_url, &self.collection);
                if let Some(size) = vector_size {
                    store.ensure_collection(size).await?;
                }
                Box::new(store)
            }
        })
    }

    fn build_generator(&self) -> anyhow::Result<Box<dyn Generator>> {
        Ok(match self.generator {
            GeneratorBackend::Ollama => Box::new(OllamaGenerator::new(
                &self.ollama_url,
                &self.ollama_model,
                self.decoding(),
            )?),
            GeneratorBackend::Gemini => {
                let key = self
                    .gemini_api_key
                    .clone()
                    .context("GOOGLE_API_KEY is required for the gemini generator")?;
                Box::new(GeminiGenerator::new(
                    DEFAULT_GEMINI_URL,
                    &self.gemini_model,
                    key,
                    self.decoding(),
                )?)
            }
        })
    }

    async fn build_retrieval(
        &self,
    ) -> anyhow::Result<RetrievalEngine<Box<dyn Embedder>, Box<dyn VectorIndex>>> {
        let chunks = Arc::new(ChunkStore::new(&self.chunks_dir));
        Ok(RetrievalEngine::new(
            self.build_embedder()?,
            self.build_index(None).await?,
            chunks,
        ))
    }

    async fn build_orchestrator(
        &self,
    ) -> anyhow::Result<DynOrchestrator> {
        Ok(AnswerOrchestrator::new(
            self.build_retrieval().await?,
            self.build_generator()?,
            self.top_k,
        ))
    }
}

fn report_stage(stage: &str, report: &StageReport) {
    println!(
        "{stage}: {} file(s) processed, {} item(s), {} skipped",
        report.processed.len(),
        report.items,
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push_str("...");
    }
    out
}

fn print_sources(sources: &[RetrievalHit]) {
    for hit in sources {
        println!("[{}] distance={:.4} id={}", hit.rank, hit.distance, hit.id);
        println!(
            "  source={} title={} type={} paragraph={}",
            hit.metadata.source_label(),
            hit.metadata.title,
            hit.metadata.chunk_type.as_ref().map(|kind| kind.as_str()).unwrap_or("N/A"),
            hit.metadata.paragraph_label()
        );
        println!("  {}", excerpt(&hit.display_text()));
    }
}

fn print_result(result: &QueryResult) {
    println!("answer: {}", result.answer);
    if !result.sources.is_empty() {
        println!("sources:");
        print_sources(&result.sources);
    }
}

async fn run_extract(cli: &Cli) -> anyhow::Result<()> {
    let grobid = GrobidClient::new(&cli.grobid_url)?;
    let report = extract_folder(&grobid, &cli.pdf_dir, &cli.xml_dir).await?;
    report_stage("extract", &report);
    Ok(())
}

fn run_chunk(cli: &Cli) -> anyhow::Result<()> {
    let report = chunk_folder(&cli.xml_dir, &cli.chunks_dir)?;
    report_stage("chunk", &report);
    Ok(())
}

async fn run_embed(cli: &Cli) -> anyhow::Result<()> {
    let embedder = cli.build_embedder()?;
    let report = embed_folder(&embedder, &cli.chunks_dir, &cli.embeddings_dir).await?;
    report_stage("embed", &report);
    Ok(())
}

async fn run_index(cli: &Cli) -> anyhow::Result<()> {
    let Some(size) = stored_dimensions(&cli.embeddings_dir)? else {
        bail!("no embeddings found in {}", cli.embeddings_dir.display());
    };
    let index = cli.build_index(Some(size)).await?;
    let report = index_folder(&index, &cli.embeddings_dir).await?;
    report_stage("index", &report);
    println!("collection '{}' now holds {} vector(s)", cli.collection, index.count().await?);
    Ok(())
}

async fn run_chat<E, V, G>(orchestrator: &AnswerOrchestrator<E, V, G>) -> anyhow::Result<()>
where
    E: Embedder,
    V: VectorIndex,
    G: Generator,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"question> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        print_result(&orchestrator.answer(question).await);
    }

    Ok(())
}

async fn run_doctor(cli: &Cli) -> anyhow::Result<()> {
    match GrobidClient::new(&cli.grobid_url)?.is_alive().await {
        Ok(true) => println!("grobid: alive at {}", cli.grobid_url),
        Ok(false) => println!("grobid: not ready at {}", cli.grobid_url),
        Err(error) => println!("grobid: unreachable ({error})"),
    }

    let ollama = OllamaGenerator::new(&cli.ollama_url, &cli.ollama_model, cli.decoding())?;
    match ollama.ensure_model_available().await {
        Ok(models) => println!("ollama: '{}' available ({})", ollama.model(), models.join(", ")),
        Err(error) => println!("ollama: {error}"),
    }

    match cli.build_index(None).await {
        Ok(index) => match index.count().await {
            Ok(count) => println!("index: '{}' holds {count} vector(s)", cli.collection),
            Err(error) => println!("index: {error}"),
        },
        Err(error) => println!("index: {error}"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "paper-qa boot"
    );

    match &cli.command {
        Command::Extract => run_extract(&cli).await?,
        Command::Chunk => run_chunk(&cli)?,
        Command::Embed => run_embed(&cli).await?,
        Command::Index => run_index(&cli).await?,
        Command::Ingest => {
            if let Err(error) = run_extract(&cli).await {
                warn!(error = %error, "extraction stage failed, continuing with existing XML");
            }
            run_chunk(&cli)?;
            run_embed(&cli).await?;
            run_index(&cli).await?;
            println!("ingestion finished at {}", Utc::now().to_rfc3339());
        }
        Command::Search { query } => {
            let retrieval = cli.build_retrieval().await?;
            let hits = retrieval.retrieve(query, cli.top_k).await?;
            if hits.is_empty() {
                println!("no passages found");
            }
            print_sources(&hits);
        }
        Command::Ask { query } => {
            let orchestrator = cli.build_orchestrator().await?;
            print_result(&orchestrator.answer(query).await);
        }
        Command::Chat => {
            let orchestrator = cli.build_orchestrator().await?;
            run_chat(&orchestrator).await?;
        }
        Command::Doctor => run_doctor(&cli).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_come_from_typed_config() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["paper-qa", "chunk"])?;
        let paths = PipelinePaths::default();
        let decoding = DecodingParams::default();

        assert_eq!(cli.pdf_dir, paths.pdf_dir);
        assert_eq!(cli.xml_dir, paths.xml_dir);
        assert_eq!(cli.chunks_dir, paths.chunks_dir);
        assert_eq!(cli.embeddings_dir, paths.embeddings_dir);
        assert_eq!(cli.index_dir, paths.index_dir);
        assert_eq!(cli.decoding(), decoding);
        assert_eq!(cli.top_k, RetrievalOptions::default().top_k);
        assert_eq!(cli.collection, DEFAULT_COLLECTION);
        Ok(())
    }
}

use crate::chunking::{chunk_xml_file, read_chunk_file, CHUNKS_SUFFIX};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{extracted_file_name, GrobidClient};
use crate::models::{ChunkMetadata, EmbeddingRecord, IndexEntry};
use crate::traits::VectorIndex;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const META_SUFFIX: &str = "_meta.json";
pub const EMBEDDINGS_SUFFIX: &str = "_embeddings.json";

/// Files directly inside `folder` whose name ends with `suffix`
/// (case-insensitive), sorted.
pub fn discover_files(folder: &Path, suffix: &str) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "input directory {} not found",
            folder.display()
        )));
    }

    let suffix = suffix.to_lowercase();
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.to_lowercase().ends_with(&suffix));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one stage over a folder. One bad file never aborts the stage.
#[derive(Debug, Default)]
pub struct StageReport {
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
    /// Chunks (or documents, for extraction) produced by the stage.
    pub items: usize,
}

impl StageReport {
    fn skip(&mut self, path: PathBuf, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = %path.display(), reason = %reason, "skipped file");
        self.skipped.push(SkippedFile { path, reason });
    }
}

fn base_name(path: &Path, suffix: &str) -> Result<String, IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    Ok(name.strip_suffix(suffix).unwrap_or(name).to_string())
}

/// Sends every PDF in `pdf_dir` through GROBID and stores the TEI output.
pub async fn extract_folder(
    grobid: &GrobidClient,
    pdf_dir: &Path,
    xml_dir: &Path,
) -> Result<StageReport, IngestError> {
    if !grobid.is_alive().await? {
        return Err(IngestError::Extraction(
            "grobid service is not alive".to_string(),
        ));
    }

    let files = discover_files(pdf_dir, ".pdf")?;
    fs::create_dir_all(xml_dir)?;
    let mut report = StageReport::default();

    for path in files {
        let started = Instant::now();
        let result = async {
            let output = xml_dir.join(extracted_file_name(&path)?);
            let xml = grobid.process_fulltext(&path).await?;
            tokio::fs::write(&output, xml).await?;
            Ok::<_, IngestError>(output)
        }
        .await;

        match result {
            Ok(output) => {
                info!(
                    pdf = %path.display(),
                    xml = %output.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "extracted"
                );
                report.items += 1;
                report.processed.push(path);
            }
            Err(error) => report.skip(path, error.to_string()),
        }
    }

    Ok(report)
}

/// Parses every extracted XML file into a chunk file.
pub fn chunk_folder(xml_dir: &Path, chunks_dir: &Path) -> Result<StageReport, IngestError> {
    let files = discover_files(xml_dir, ".xml")?;
    fs::create_dir_all(chunks_dir)?;
    let mut report = StageReport::default();

    for path in files {
        match chunk_xml_file(&path, chunks_dir) {
            Ok((Some(output), count)) => {
                info!(xml = %path.display(), chunks = count, output = %output.display(), "chunked");
                report.items += count;
                report.processed.push(path);
            }
            Ok((None, _)) => report.skip(path, "no text paragraphs found"),
            Err(error) => report.skip(path, error.to_string()),
        }
    }

    Ok(report)
}

pub fn write_embedding_records(
    embeddings_dir: &Path,
    base: &str,
    records: &[EmbeddingRecord],
) -> Result<(), IngestError> {
    let metadata = records.iter().map(|record| &record.metadata).collect::<Vec<_>>();
    let vectors = records.iter().map(|record| &record.vector).collect::<Vec<_>>();

    let meta_file = File::create(embeddings_dir.join(format!("{base}{META_SUFFIX}")))?;
    serde_json::to_writer_pretty(BufWriter::new(meta_file), &metadata)?;

    let vector_file = File::create(embeddings_dir.join(format!("{base}{EMBEDDINGS_SUFFIX}")))?;
    serde_json::to_writer(BufWriter::new(vector_file), &vectors)?;
    Ok(())
}

/// Loads a metadata file and its sibling vector file; the two must align.
pub fn read_embedding_records(meta_path: &Path) -> Result<Vec<EmbeddingRecord>, IngestError> {
    let base = base_name(meta_path, META_SUFFIX)?;
    let vectors_path = meta_path.with_file_name(format!("{base}{EMBEDDINGS_SUFFIX}"));

    if !vectors_path.exists() {
        return Err(IngestError::InvalidArgument(format!(
            "embedding file {} not found",
            vectors_path.display()
        )));
    }

    let metadata: Vec<ChunkMetadata> = serde_json::from_str(&fs::read_to_string(meta_path)?)?;
    let vectors: Vec<Vec<f32>> = serde_json::from_str(&fs::read_to_string(&vectors_path)?)?;

    if metadata.len() != vectors.len() {
        return Err(IngestError::LengthMismatch {
            base_name: base,
            metadata: metadata.len(),
            embeddings: vectors.len(),
        });
    }

    Ok(vectors
        .into_iter()
        .zip(metadata)
        .map(|(vector, metadata)| EmbeddingRecord { vector, metadata })
        .collect())
}

/// Embeds every chunk file, one batch per document.
pub async fn embed_folder<E: Embedder>(
    embedder: &E,
    chunks_dir: &Path,
    embeddings_dir: &Path,
) -> Result<StageReport, IngestError> {
    let files = discover_files(chunks_dir, CHUNKS_SUFFIX)?;
    fs::create_dir_all(embeddings_dir)?;
    let mut report = StageReport::default();

    for path in files {
        let result = async {
            let base = base_name(&path, CHUNKS_SUFFIX)?;
            let chunks = read_chunk_file(&path)?;
            if chunks.is_empty() {
                return Ok(None);
            }

            let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
            let vectors = embedder.encode_batch(&texts).await?;
            if vectors.len() != chunks.len() {
                return Err(IngestError::LengthMismatch {
                    base_name: base,
                    metadata: chunks.len(),
                    embeddings: vectors.len(),
                });
            }

            let records = vectors
                .into_iter()
                .zip(chunks)
                .map(|(vector, chunk)| EmbeddingRecord {
                    vector,
                    metadata: chunk.metadata,
                })
                .collect::<Vec<_>>();
            write_embedding_records(embeddings_dir, &base, &records)?;
            Ok::<_, IngestError>(Some(records.len()))
        }
        .await;

        match result {
            Ok(Some(count)) => {
                info!(chunks_file = %path.display(), embedded = count, "embedded");
                report.items += count;
                report.processed.push(path);
            }
            Ok(None) => report.skip(path, "no chunks in file"),
            Err(error) => report.skip(path, error.to_string()),
        }
    }

    Ok(report)
}

/// Length of the first stored vector, used to size a new collection.
pub fn stored_dimensions(embeddings_dir: &Path) -> Result<Option<usize>, IngestError> {
    for meta_path in discover_files(embeddings_dir, META_SUFFIX)? {
        if let Ok(records) = read_embedding_records(&meta_path) {
            if let Some(record) = records.first() {
                return Ok(Some(record.vector.len()));
            }
        }
    }
    Ok(None)
}

/// Adds every metadata/vector file pair to the index under positional ids.
pub async fn index_folder<V: VectorIndex>(
    index: &V,
    embeddings_dir: &Path,
) -> Result<StageReport, IngestError> {
    let files = discover_files(embeddings_dir, META_SUFFIX)?;
    let mut report = StageReport::default();

    for path in files {
        let result = async {
            let base = base_name(&path, META_SUFFIX)?;
            let records = read_embedding_records(&path)?;
            if records.is_empty() {
                return Ok(0);
            }

            let fallback_source = format!("{base}.pdf");
            let mut ids = Vec::with_capacity(records.len());
            let mut vectors = Vec::with_capacity(records.len());
            let mut metadatas = Vec::with_capacity(records.len());

            for (position, record) in records.into_iter().enumerate() {
                let source = record
                    .metadata
                    .source_file
                    .clone()
                    .unwrap_or_else(|| fallback_source.clone());
                ids.push(IndexEntry::chunk_id(&source, position));
                vectors.push(record.vector);
                metadatas.push(record.metadata);
            }

            index.add(&ids, &vectors, &metadatas).await?;
            Ok::<_, IngestError>(ids.len())
        }
        .await;

        match result {
            Ok(0) => report.skip(path, "no metadata/embeddings in file pair"),
            Ok(count) => {
                info!(meta = %path.display(), added = count, "indexed");
                report.items += count;
                report.processed.push(path);
            }
            Err(error) => report.skip(path, error.to_string()),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::chunking::write_chunk_file;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::Chunk;
    use crate::stores::LocalIndex;
    use tempfile::tempdir;

    fn sample_chunks(source: &str) -> Vec<Chunk> {
        vec![
            Chunk {
                text: "An abstract about persistence.".to_string(),
                metadata: ChunkMetadata::abstract_of(source, "Paper"),
            },
            Chunk {
                text: "Cells persisted for six months.".to_string(),
                metadata: ChunkMetadata::paragraph(source, "Paper", 0),
            },
            Chunk {
                text: "Relapse occurred in two patients.".to_string(),
                metadata: ChunkMetadata::paragraph(source, "Paper", 2),
            },
        ]
    }

    #[test]
    fn discovery_is_flat_and_case_insensitive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("a.PDF"), b"%PDF")?;
        fs::write(dir.path().join("b.pdf"), b"%PDF")?;
        fs::write(dir.path().join("notes.txt"), b"")?;
        fs::write(dir.path().join("nested").join("c.pdf"), b"%PDF")?;

        let files = discover_files(dir.path(), ".pdf")?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_input_directory_is_an_error() {
        assert!(discover_files(Path::new("/definitely/not/here"), ".xml").is_err());
    }

    #[tokio::test]
    async fn embedding_files_align_with_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks_dir = dir.path().join("chunks");
        let embeddings_dir = dir.path().join("embeddings");
        fs::create_dir_all(&chunks_dir)?;
        write_chunk_file(&chunks_dir.join("a_chunks.json"), &sample_chunks("a.pdf"))?;

        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let report = embed_folder(&embedder, &chunks_dir, &embeddings_dir).await?;
        assert_eq!(report.items, 3);

        let records = read_embedding_records(&embeddings_dir.join("a_meta.json"))?;
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].metadata.paragraph_index, Some(2));
        assert_eq!(records[1].vector, embedder.embed("Cells persisted for six months."));
        assert_eq!(stored_dimensions(&embeddings_dir)?, Some(16));
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_pairs_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("bad_meta.json"),
            serde_json::to_string(&vec![ChunkMetadata::paragraph("bad.pdf", "B", 0); 2])?,
        )?;
        fs::write(dir.path().join("bad_embeddings.json"), "[[0.1, 0.2]]")?;
        fs::write(
            dir.path().join("lonely_meta.json"),
            serde_json::to_string(&vec![ChunkMetadata::paragraph("lonely.pdf", "L", 0)])?,
        )?;

        let index = LocalIndex::in_memory("papers");
        let report = index_folder(&index, dir.path()).await?;
        assert_eq!(report.items, 0);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(index.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn reindexing_is_idempotent_and_chunks_round_trip(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let chunks_dir = dir.path().join("chunks");
        let embeddings_dir = dir.path().join("embeddings");
        fs::create_dir_all(&chunks_dir)?;
        write_chunk_file(&chunks_dir.join("a_chunks.json"), &sample_chunks("a.pdf"))?;

        let embedder = CharacterNgramEmbedder::default();
        embed_folder(&embedder, &chunks_dir, &embeddings_dir).await?;

        let index = LocalIndex::in_memory("papers");
        index_folder(&index, &embeddings_dir).await?;
        index_folder(&index, &embeddings_dir).await?;
        assert_eq!(index.count().await?, 3);

        let query = embedder.embed("Relapse occurred in two patients.");
        let hits = index.query(&query, 1).await?;
        assert_eq!(hits[0].id, "a.pdf_chunk_2");

        let store = ChunkStore::new(&chunks_dir);
        assert_eq!(
            store.resolve(&hits[0].metadata).await?,
            "Relapse occurred in two patients."
        );
        Ok(())
    }
}

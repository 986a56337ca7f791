use std::path::PathBuf;

pub const DEFAULT_COLLECTION: &str = "scientific_papers";

/// Directories shared by the ingestion stages and the chunk store.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub pdf_dir: PathBuf,
    pub xml_dir: PathBuf,
    pub chunks_dir: PathBuf,
    pub embeddings_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for PipelinePaths {
    fn default() -> Self {
        Self {
            pdf_dir: PathBuf::from("pdfs_input"),
            xml_dir: PathBuf::from("grobid_output"),
            chunks_dir: PathBuf::from("chunks_output"),
            embeddings_dir: PathBuf::from("embeddings_output"),
            index_dir: PathBuf::from("vector_index"),
        }
    }
}

/// Decoding parameters, fixed once when a generator is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 150,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const TITLE_NOT_FOUND: &str = "Title not found";
pub const CHUNKS_SUFFIX: &str = "_chunks.json";
pub const EXTRACTED_SUFFIX: &str = "_grobid.xml";

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `paper.pdf` -> `paper_chunks.json`.
pub fn chunk_file_name(source_file: &str) -> String {
    let base = source_file.strip_suffix(".pdf").unwrap_or(source_file);
    format!("{base}{CHUNKS_SUFFIX}")
}

/// Base name shared by every artifact of one document, derived from the
/// extracted XML file name (`paper_grobid.xml` -> `paper`).
pub fn document_base_name(xml_file_name: &str) -> String {
    xml_file_name
        .strip_suffix(EXTRACTED_SUFFIX)
        .or_else(|| xml_file_name.strip_suffix(".xml"))
        .unwrap_or(xml_file_name)
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Title,
    Abstract,
    Paragraph,
}

struct Capture {
    target: Target,
    depth: usize,
    text: String,
}

fn ends_with(stack: &[String], suffix: &[&str]) -> bool {
    stack.len() >= suffix.len()
        && stack[stack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(element, expected)| element == expected)
}

fn inside_body(stack: &[String]) -> bool {
    stack
        .iter()
        .position(|element| element == "text")
        .is_some_and(|text_at| stack[text_at + 1..].iter().any(|element| element == "body"))
}

/// Turns a TEI document (as produced by GROBID) into the chunk sequence for
/// `source_file`: the abstract first, then one chunk per non-empty body
/// paragraph. Paragraph indices count every body `<p>`, empty ones included.
pub fn parse_tei(xml: &str, source_file: &str) -> Result<Vec<Chunk>, IngestError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<String> = Vec::new();
    let mut capture: Option<Capture> = None;
    let mut title: Option<String> = None;
    let mut abstract_text: Option<String> = None;
    let mut paragraphs: Vec<String> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).to_string();

                if capture.is_none() {
                    let target = match name.as_str() {
                        "title"
                            if title.is_none()
                                && ends_with(&stack, &["teiHeader", "fileDesc", "titleStmt"]) =>
                        {
                            Some(Target::Title)
                        }
                        "p" if abstract_text.is_none()
                            && ends_with(&stack, &["teiHeader", "profileDesc", "abstract"]) =>
                        {
                            Some(Target::Abstract)
                        }
                        "p" if inside_body(&stack) => Some(Target::Paragraph),
                        _ => None,
                    };

                    if let Some(target) = target {
                        capture = Some(Capture {
                            target,
                            depth: stack.len() + 1,
                            text: String::new(),
                        });
                    }
                }

                stack.push(name);
            }
            Event::Empty(element) => {
                let is_paragraph = element.local_name().as_ref() == b"p";
                if is_paragraph && capture.is_none() && inside_body(&stack) {
                    paragraphs.push(String::new());
                }
            }
            Event::Text(text) => {
                if let Some(active) = capture.as_mut() {
                    active.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(active) = capture.as_mut() {
                    active.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                if capture.as_ref().is_some_and(|active| active.depth == stack.len()) {
                    if let Some(done) = capture.take() {
                        match done.target {
                            Target::Title => title = Some(done.text.trim().to_string()),
                            Target::Abstract => abstract_text = Some(done.text.trim().to_string()),
                            Target::Paragraph => paragraphs.push(done.text),
                        }
                    }
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let title = title.unwrap_or_else(|| TITLE_NOT_FOUND.to_string());
    let mut chunks = Vec::new();

    if let Some(text) = abstract_text.filter(|text| !text.is_empty()) {
        chunks.push(Chunk {
            text: normalize_whitespace(&text),
            metadata: ChunkMetadata::abstract_of(source_file, title.clone()),
        });
    }

    for (index, paragraph) in paragraphs.iter().enumerate() {
        let cleaned = normalize_whitespace(paragraph);
        if cleaned.is_empty() {
            continue;
        }
        chunks.push(Chunk {
            text: cleaned,
            metadata: ChunkMetadata::paragraph(source_file, title.clone(), index),
        });
    }

    Ok(chunks)
}

pub fn write_chunk_file(path: &Path, chunks: &[Chunk]) -> Result<(), IngestError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, chunks)?;
    Ok(())
}

pub fn read_chunk_file(path: &Path) -> Result<Vec<Chunk>, IngestError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Chunks one extracted XML file into `chunks_dir`. Returns the written path,
/// or `None` when the document yielded no chunks.
pub fn chunk_xml_file(
    xml_path: &Path,
    chunks_dir: &Path,
) -> Result<(Option<PathBuf>, usize), IngestError> {
    let file_name = xml_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(xml_path.display().to_string()))?;

    let base = document_base_name(file_name);
    let source_file = format!("{base}.pdf");
    let xml = fs::read_to_string(xml_path)?;
    let chunks = parse_tei(&xml, &source_file)?;

    if chunks.is_empty() {
        return Ok((None, 0));
    }

    let output = chunks_dir.join(chunk_file_name(&source_file));
    write_chunk_file(&output, &chunks)?;
    Ok((Some(output), chunks.len()))
}

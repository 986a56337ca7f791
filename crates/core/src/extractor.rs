use crate::error::IngestError;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_GROBID_URL: &str = "http://localhost:8070";

const ALIVE_TIMEOUT: Duration = Duration::from_secs(10);
const PROCESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for a GROBID service, which turns a PDF into TEI XML.
#[derive(Debug, Clone)]
pub struct GrobidClient {
    client: Client,
    base_url: Url,
}

impl GrobidClient {
    pub fn new(base_url: &str) -> Result<Self, IngestError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| {
                IngestError::InvalidArgument(format!("grobid url {base_url}: {error}"))
            })?;
        let client = Client::builder()
            .timeout(PROCESS_TIMEOUT)
            .build()
            .map_err(|error| IngestError::Extraction(error.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IngestError> {
        self.base_url
            .join(path)
            .map_err(|error| IngestError::InvalidArgument(error.to_string()))
    }

    /// GROBID answers `true` on `/api/isalive` once it is ready.
    pub async fn is_alive(&self) -> Result<bool, IngestError> {
        let response = self
            .client
            .get(self.endpoint("/api/isalive")?)
            .timeout(ALIVE_TIMEOUT)
            .send()
            .await
            .map_err(|error| IngestError::Extraction(error.to_string()))?;

        if !response.status().is_success() {
            return Ok(false);
        }
        let body = response
            .text()
            .await
            .map_err(|error| IngestError::Extraction(error.to_string()))?;
        Ok(body.trim() == "true")
    }

    pub async fn process_fulltext(&self, pdf_path: &Path) -> Result<String, IngestError> {
        let file_name = pdf_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(pdf_path.display().to_string()))?
            .to_string();

        let bytes = tokio::fs::read(pdf_path).await?;
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|error| IngestError::Extraction(error.to_string()))?;

        let form = Form::new()
            .part("input", part)
            .text("consolidateHeader", "1")
            .text("segmentSentences", "true");

        let response = self
            .client
            .post(self.endpoint("/api/processFulltextDocument")?)
            .multipart(form)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    IngestError::Extraction(format!("request timed out for {}", pdf_path.display()))
                } else {
                    IngestError::Extraction(error.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| IngestError::Extraction(error.to_string()))?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(500).collect();
            return Err(IngestError::Extraction(format!(
                "grobid returned {status} for {}: {excerpt}",
                pdf_path.display()
            )));
        }

        Ok(body)
    }
}

/// `paper.pdf` -> `paper_grobid.xml`.
pub fn extracted_file_name(pdf_path: &Path) -> Result<String, IngestError> {
    let stem = pdf_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(pdf_path.display().to_string()))?;
    Ok(format!("{stem}{}", crate::chunking::EXTRACTED_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::document_base_name;

    #[test]
    fn extracted_name_round_trips_to_base_name() -> Result<(), IngestError> {
        let name = extracted_file_name(Path::new("papers/car-t.pdf"))?;
        assert_eq!(name, "car-t_grobid.xml");
        assert_eq!(document_base_name(&name), "car-t");
        Ok(())
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(GrobidClient::new("not a url").is_err());
        assert!(GrobidClient::new(DEFAULT_GROBID_URL).is_ok());
    }
}

use crate::config::DecodingParams;
use crate::error::{BackendError, GenerationFailure};
use crate::models::GenerationResult;
use crate::traits::Generator;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3:8b";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

impl ModelInfo {
    fn tag(self) -> Option<String> {
        self.name.or(self.model)
    }
}

/// Chat completion against a local Ollama server. Ollama has no content
/// safety filter, so it never reports a refusal.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: Client,
    base_url: Url,
    model: String,
    params: DecodingParams,
}

impl OllamaGenerator {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        params: DecodingParams,
    ) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            model: model.into(),
            params,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn available_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .get(self.base_url.join("/api/tags")?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().filter_map(ModelInfo::tag).collect())
    }

    /// Succeeds when any installed tag contains the configured model name.
    pub async fn ensure_model_available(&self) -> Result<Vec<String>, BackendError> {
        let models = self.available_models().await?;
        if models.iter().any(|tag| tag.contains(&self.model)) {
            Ok(models)
        } else {
            Err(BackendError::NotReady(format!(
                "model like '{model}' not found in ollama (available: {}); \
                 pull it with `ollama pull {model}`",
                models.join(", "),
                model = self.model
            )))
        }
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: ChatOptions {
                temperature: self.params.temperature,
                num_predict: self.params.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationFailure> {
        let url = self
            .base_url
            .join("/api/chat")
            .map_err(|error| GenerationFailure::MalformedResponse {
                backend: self.name().to_string(),
                details: error.to_string(),
            })?;

        let response = self
            .client
            .post(url)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(|error| GenerationFailure::from_transport(self.name(), error))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationFailure::Backend {
                backend: self.name().to_string(),
                status: status.as_u16(),
                details,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| GenerationFailure::MalformedResponse {
                backend: self.name().to_string(),
                details: error.to_string(),
            })?;

        parsed
            .message
            .map(|message| GenerationResult::text(message.content))
            .ok_or_else(|| GenerationFailure::MalformedResponse {
                backend: self.name().to_string(),
                details: "chat response has no message".to_string(),
            })
    }
}

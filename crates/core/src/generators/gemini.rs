use super::SAFETY_REFUSAL_MESSAGE;
use crate::config::DecodingParams;
use crate::error::{BackendError, GenerationFailure};
use crate::models::GenerationResult;
use crate::traits::Generator;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-lite";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const SAFETY_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

pub struct GeminiGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
    params: DecodingParams,
}

impl GeminiGenerator {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: impl Into<String>,
        params: DecodingParams,
    ) -> Result<Self, BackendError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackendError::Request("gemini api key is empty".to_string()));
        }

        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: Url::parse(&format!("{base}/v1beta/models/{model}:generateContent"))?,
            api_key,
            params,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let safety_settings = HARM_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
            .collect::<Vec<_>>();

        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "safetySettings": safety_settings,
            "generationConfig": {
                "temperature": self.params.temperature,
                "maxOutputTokens": self.params.max_output_tokens,
            },
        })
    }
}

/// Classifies a `generateContent` response body as text, refusal or
/// malformed.
pub fn interpret_response(body: &Value) -> Result<GenerationResult, GenerationFailure> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        warn!(block_reason = reason, "gemini blocked the prompt");
        return Ok(GenerationResult::refusal(SAFETY_REFUSAL_MESSAGE));
    }

    let candidate = body
        .pointer("/candidates/0")
        .ok_or_else(|| GenerationFailure::MalformedResponse {
            backend: "gemini".to_string(),
            details: "response has no candidates".to_string(),
        })?;

    let text = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(GenerationResult::text(text));
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or("UNSPECIFIED");

    if SAFETY_FINISH_REASONS.contains(&finish_reason) {
        warn!(finish_reason, "gemini withheld the answer");
        return Ok(GenerationResult::refusal(SAFETY_REFUSAL_MESSAGE));
    }

    Err(GenerationFailure::MalformedResponse {
        backend: "gemini".to_string(),
        details: format!("candidate has no text (finish reason {finish_reason})"),
    })
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationFailure> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
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

        let body: Value = response
            .json()
            .await
            .map_err(|error| GenerationFailure::MalformedResponse {
                backend: self.name().to_string(),
                details: error.to_string(),
            })?;

        interpret_response(&body)
    }
}

//! Google Gemini adapter (`models/{model}:generateContent` REST endpoint).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompts::PING_PROMPT;
use super::{post_json, AiProvider, AiRequest, ProviderError, ProviderKind};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "Gemini";

/// Used when verification has not pinned a model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-lite";

/// Probed in order; the first that answers is pinned for the session.
pub const PROBE_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash-lite",
    "gemini-2.0-flash",
];

const TEMPERATURE: f32 = 0.3;
const MAX_OUTPUT_TOKENS: u32 = 65_536;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate, if any text exists.
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

impl<'a> GenerateContentRequest<'a> {
    fn generation(request: &AiRequest<'a>) -> Self {
        Self {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: request.system,
                }],
            }),
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                response_mime_type: "application/json",
            }),
        }
    }

    fn probe() -> Self {
        Self {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: PING_PROMPT }],
            }],
            generation_config: None,
        }
    }
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self::with_base_url(GEMINI_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn generate(
        &self,
        model: &str,
        api_key: &str,
        body: &GenerateContentRequest<'_>,
    ) -> Result<String, ProviderError> {
        let builder = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", api_key);
        let raw = post_json(PROVIDER, builder, body).await?;

        let response: GenerateContentResponse =
            serde_json::from_str(&raw).map_err(|e| ProviderError::decode(PROVIDER, e))?;
        if let Some(usage) = &response.usage_metadata {
            debug!(
                "Gemini call succeeded: model={}, prompt_tokens={}, output_tokens={}",
                model, usage.prompt_token_count, usage.candidates_token_count
            );
        }
        response.text().ok_or_else(|| ProviderError::empty(PROVIDER))
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    fn probe_models(&self) -> &'static [&'static str] {
        PROBE_MODELS
    }

    async fn invoke(&self, model: &str, request: &AiRequest<'_>) -> Result<String, ProviderError> {
        self.generate(model, request.api_key, &GenerateContentRequest::generation(request))
            .await
    }

    async fn probe(&self, model: &str, api_key: &str) -> Result<(), ProviderError> {
        self.generate(model, api_key, &GenerateContentRequest::probe())
            .await
            .map(|_| ())
    }
}

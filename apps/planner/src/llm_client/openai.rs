//! OpenAI adapter (chat completions endpoint).
//!
//! Verification probes a cheap model; generation always uses `DEFAULT_MODEL`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompts::PING_PROMPT;
use super::{post_json, AiProvider, AiRequest, ProviderError, ProviderKind};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "OpenAI";

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const PROBE_MODELS: &[&str] = &["gpt-4o-mini"];

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 16_384;
const PROBE_MAX_TOKENS: u32 = 5;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ChatResponse {
    fn text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()?
            .message
            .content
            .filter(|c| !c.is_empty())
    }
}

impl<'a> ChatRequest<'a> {
    fn generation(model: &'a str, request: &AiRequest<'a>) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: Some(TEMPERATURE),
            max_tokens: MAX_TOKENS,
            response_format: Some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }

    fn probe(model: &'a str) -> Self {
        Self {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: PING_PROMPT,
            }],
            temperature: None,
            max_tokens: PROBE_MAX_TOKENS,
            response_format: None,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new() -> Self {
        Self::with_base_url(OPENAI_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn complete(&self, api_key: &str, body: &ChatRequest<'_>) -> Result<String, ProviderError> {
        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key);
        let raw = post_json(PROVIDER, builder, body).await?;

        let response: ChatResponse =
            serde_json::from_str(&raw).map_err(|e| ProviderError::decode(PROVIDER, e))?;
        if let Some(usage) = &response.usage {
            debug!(
                "OpenAI call succeeded: model={}, prompt_tokens={}, completion_tokens={}",
                body.model, usage.prompt_tokens, usage.completion_tokens
            );
        }
        response.text().ok_or_else(|| ProviderError::empty(PROVIDER))
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn default_model(&self) -> &'static str {
        DEFAULT_MODEL
    }

    fn probe_models(&self) -> &'static [&'static str] {
        PROBE_MODELS
    }

    fn pins_probed_model(&self) -> bool {
        false
    }

    async fn invoke(&self, model: &str, request: &AiRequest<'_>) -> Result<String, ProviderError> {
        self.complete(request.api_key, &ChatRequest::generation(model, request))
            .await
    }

    async fn probe(&self, model: &str, api_key: &str) -> Result<(), ProviderError> {
        self.complete(api_key, &ChatRequest::probe(model))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_request_shape() {
        let request = AiRequest {
            system: "SYSTEM",
            prompt: "PROMPT",
            api_key: "sk-test",
        };
        let json = serde_json::to_value(ChatRequest::generation(DEFAULT_MODEL, &request)).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "SYSTEM");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "PROMPT");
        assert_eq!(json["max_tokens"], 16_384);
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_probe_request_is_minimal() {
        let json = serde_json::to_value(ChatRequest::probe("gpt-4o-mini")).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["max_tokens"], 5);
        assert!(json.get("response_format").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_text_from_first_choice() {
        let raw = r#"{
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"rows\":[]}"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.text().as_deref(), Some("{\"rows\":[]}"));
    }

    #[test]
    fn test_response_with_null_content_is_empty() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(response.text().is_none());
    }

    #[test]
    fn test_openai_does_not_pin_probe_model() {
        let provider = OpenAiProvider::new();
        assert!(!provider.pins_probed_model());
        assert_eq!(provider.default_model(), "gpt-4o");
    }
}

/// AI Client Adapter — the single point of entry for every AI provider call.
///
/// ARCHITECTURAL RULE: no other module talks to a vendor API directly.
/// Callers hold an `Arc<dyn AiProvider>` and never branch on the vendor.
///
/// The adapter does not retry: a failed call is reported once and the
/// caller decides what to do with it.
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod gemini;
pub mod openai;
pub mod prompts;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

// ────────────────────────────────────────────────────────────────────────────
// Provider identity
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    /// Human-facing vendor name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::OpenAi => "OpenAI",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown AI provider '{other}' (expected gemini or openai)")),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorCode {
    /// Non-success HTTP status returned by the vendor.
    Http(u16),
    /// The request never produced a response (DNS, TLS, connection reset...).
    Transport,
    /// The vendor answered successfully but without any text.
    EmptyResponse,
    /// The response body did not have the expected shape.
    Decode,
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "{status}"),
            Self::Transport => f.write_str("transport"),
            Self::EmptyResponse => f.write_str("empty_response"),
            Self::Decode => f.write_str("decode"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{provider} request failed ({code}): {message}")]
pub struct ProviderError {
    pub provider: &'static str,
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn http(provider: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self {
            provider,
            code: ProviderErrorCode::Http(status),
            message: message.into(),
        }
    }

    pub fn transport(provider: &'static str, err: reqwest::Error) -> Self {
        Self {
            provider,
            code: ProviderErrorCode::Transport,
            message: err.to_string(),
        }
    }

    pub fn empty(provider: &'static str) -> Self {
        Self {
            provider,
            code: ProviderErrorCode::EmptyResponse,
            message: format!("{provider} returned no text"),
        }
    }

    pub fn decode(provider: &'static str, err: serde_json::Error) -> Self {
        Self {
            provider,
            code: ProviderErrorCode::Decode,
            message: format!("unexpected response body: {err}"),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self.code {
            ProviderErrorCode::Http(status) => Some(status),
            _ => None,
        }
    }

    /// 429 or a quota / resource-exhausted message.
    pub fn is_quota_signal(&self) -> bool {
        let lower = self.message.to_lowercase();
        self.status() == Some(429) || lower.contains("quota") || lower.contains("resource_exhausted")
    }

    /// 401/403 or an invalid-key message.
    pub fn is_credential_signal(&self) -> bool {
        let lower = self.message.to_lowercase();
        matches!(self.status(), Some(401) | Some(403))
            || lower.contains("api_key_invalid")
            || lower.contains("invalid_api_key")
            || lower.contains("api key")
            || lower.contains("unauthorized")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Requests and verification outcomes
// ────────────────────────────────────────────────────────────────────────────

/// Abstract AI request: fixed system instructions, a user prompt and the credential.
#[derive(Debug, Clone, Copy)]
pub struct AiRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub api_key: &'a str,
}

/// Why a credential could not be verified. Drives user-facing messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFailure {
    InvalidCredential,
    QuotaExhausted,
    Generic,
}

impl CredentialFailure {
    /// Classifies the failures of every probed candidate. A quota signal wins
    /// over a credential signal: a key can only run out of quota if it is valid.
    pub fn classify(errors: &[ProviderError]) -> Self {
        if errors.iter().any(ProviderError::is_quota_signal) {
            Self::QuotaExhausted
        } else if errors.iter().any(ProviderError::is_credential_signal) {
            Self::InvalidCredential
        } else {
            Self::Generic
        }
    }

    pub fn user_message(&self, provider: ProviderKind, last: Option<&ProviderError>) -> String {
        match self {
            Self::InvalidCredential => format!(
                "Invalid {} API key. Check that it was copied correctly.",
                provider.label()
            ),
            Self::QuotaExhausted => format!(
                "The {} API key is valid but has no quota available. \
                 It may be a temporary rate limit: wait a few minutes and try again.",
                provider.label()
            ),
            Self::Generic => match last {
                Some(err) => format!("Error with {}: {}", provider.label(), err.message),
                None => format!("Error with {}: no model answered", provider.label()),
            },
        }
    }
}

/// Result of `AiProvider::ping`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingOutcome {
    pub ok: bool,
    /// The model that answered, when the provider pins it for generation.
    pub chosen_model: Option<String>,
    pub error: Option<String>,
    pub failure: Option<CredentialFailure>,
}

impl PingOutcome {
    pub fn verified(chosen_model: Option<String>) -> Self {
        Self {
            ok: true,
            chosen_model,
            error: None,
            failure: None,
        }
    }

    pub fn failed(failure: CredentialFailure, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            chosen_model: None,
            error: Some(message.into()),
            failure: Some(failure),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Provider capability
// ────────────────────────────────────────────────────────────────────────────

/// One AI vendor. Implement this to add a provider without touching the
/// pipeline, the handlers or the session settings.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used for generation when verification did not pin one.
    fn default_model(&self) -> &'static str;

    /// Candidates tried in order by `ping`.
    fn probe_models(&self) -> &'static [&'static str];

    /// Whether the model that answers `ping` is reused for generation.
    fn pins_probed_model(&self) -> bool {
        true
    }

    /// Sends one generation request and returns the raw text answer.
    async fn invoke(&self, model: &str, request: &AiRequest<'_>) -> Result<String, ProviderError>;

    /// Sends the smallest request the vendor accepts against `model`.
    async fn probe(&self, model: &str, api_key: &str) -> Result<(), ProviderError>;

    /// Verifies a credential. Candidate failures are absorbed until one model
    /// answers or every candidate has failed; only then is the aggregate classified.
    async fn ping(&self, api_key: &str) -> PingOutcome {
        let provider = self.kind();
        if api_key.trim().is_empty() {
            return PingOutcome::failed(
                CredentialFailure::InvalidCredential,
                "The API key cannot be empty",
            );
        }

        let mut errors: Vec<ProviderError> = Vec::new();
        for model in self.probe_models() {
            match self.probe(model, api_key).await {
                Ok(()) => {
                    info!("{} credential verified with model {}", provider.label(), model);
                    let pinned = self.pins_probed_model().then(|| model.to_string());
                    return PingOutcome::verified(pinned);
                }
                Err(e) => {
                    debug!("{} probe of {} failed: {}", provider.label(), model, e);
                    errors.push(e);
                }
            }
        }

        let failure = CredentialFailure::classify(&errors);
        warn!(
            "{} credential verification failed after {} candidates: {:?}",
            provider.label(),
            errors.len(),
            failure
        );
        PingOutcome::failed(failure, failure.user_message(provider, errors.last()))
    }
}

// Compile-time assertion: AiProvider must stay usable as `dyn AiProvider`.
const _: () = {
    fn _assert_object_safe(_: &dyn AiProvider) {}
};

// ────────────────────────────────────────────────────────────────────────────
// Shared HTTP plumbing
// ────────────────────────────────────────────────────────────────────────────

/// Sends a JSON body and returns the raw success body, mapping non-success
/// statuses to `ProviderError::http` with the vendor's error message.
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    provider: &'static str,
    builder: RequestBuilder,
    body: &B,
) -> Result<String, ProviderError> {
    let response = builder
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("{} API returned {}", provider, status);
        return Err(ProviderError::http(
            provider,
            status.as_u16(),
            describe_error_body(&body),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| ProviderError::transport(provider, e))
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    /// Gemini: "RESOURCE_EXHAUSTED", "INVALID_ARGUMENT", ...
    #[serde(default)]
    status: Option<String>,
    /// OpenAI: "invalid_api_key", "insufficient_quota", ...
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Flattens a vendor error body into one line. Falls back to the raw body.
fn describe_error_body(body: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return body.trim().to_string();
    };
    let err = envelope.error;
    let tag = err
        .status
        .or_else(|| err.code.as_ref().and_then(|c| c.as_str()).map(String::from));
    match tag {
        Some(tag) => format!("{tag}: {}", err.message),
        None => err.message,
    }
}

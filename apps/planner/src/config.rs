use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

use crate::llm_client::ProviderKind;
use crate::planning::generator::ExtractionLimits;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// xlsx workbook every plan is rendered into.
    pub template_path: PathBuf,
    /// Provider selected when the session starts.
    pub ai_provider: ProviderKind,
    /// Optional credential preloaded into the session (still has to be verified).
    pub ai_api_key: Option<String>,
    pub book_max_chars: usize,
    pub justification_max_chars: usize,
    pub max_upload_bytes: usize,
    /// Generated workbooks kept for download; the oldest are evicted first.
    pub max_stored_results: usize,
    pub gemini_base_url: Option<String>,
    pub openai_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            port: parse_or(&get, "PORT", 8080)?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            template_path: optional("TEMPLATE_PATH")
                .map(PathBuf::from)
                .context("Required environment variable 'TEMPLATE_PATH' is not set")?,
            ai_provider: match optional("AI_PROVIDER") {
                Some(raw) => raw.parse::<ProviderKind>().map_err(|e| anyhow!(e))?,
                None => ProviderKind::default(),
            },
            ai_api_key: optional("AI_API_KEY"),
            book_max_chars: parse_or(&get, "BOOK_MAX_CHARS", 300_000)?,
            justification_max_chars: parse_or(&get, "JUSTIFICATION_MAX_CHARS", 200_000)?,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            max_stored_results: parse_or(&get, "MAX_STORED_RESULTS", 50)?,
            gemini_base_url: optional("GEMINI_BASE_URL"),
            openai_base_url: optional("OPENAI_BASE_URL"),
        })
    }

    pub fn extraction_limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            book_max_chars: self.book_max_chars,
            justification_max_chars: self.justification_max_chars,
        }
    }
}

fn parse_or<T: FromStr>(get: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

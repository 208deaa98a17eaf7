//! Session settings — the AI provider, its credential and what verification
//! learned about it. One instance per process, shared through `AppState`.

pub mod handlers;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::llm_client::{AiProvider, PingOutcome, ProviderKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSettings {
    provider: ProviderKind,
    api_key: String,
    verified: bool,
    /// Model that answered verification; reused for generation when the
    /// provider pins probed models.
    chosen_model: Option<String>,
}

/// Partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// What the API exposes about the settings. The key itself is never echoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsView {
    pub provider: ProviderKind,
    pub has_api_key: bool,
    pub api_key_hint: Option<String>,
    pub verified: bool,
    pub chosen_model: Option<String>,
}

impl SessionSettings {
    pub fn new(provider: ProviderKind, api_key: Option<String>) -> Self {
        Self {
            provider,
            api_key: api_key.unwrap_or_default().trim().to_string(),
            verified: false,
            chosen_model: None,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// The configured key, if it is not blank.
    pub fn api_key(&self) -> Option<&str> {
        Some(self.api_key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn chosen_model(&self) -> Option<&str> {
        self.chosen_model.as_deref()
    }

    /// Applies `update`. Changing the provider or the key drops the
    /// verification and the remembered model.
    pub fn update(&mut self, update: SettingsUpdate) {
        let mut changed = false;
        if let Some(provider) = update.provider {
            changed |= provider != self.provider;
            self.provider = provider;
        }
        if let Some(key) = update.api_key {
            let key = key.trim().to_string();
            changed |= key != self.api_key;
            self.api_key = key;
        }
        if changed {
            debug!("Session settings changed; verification cleared");
            self.verified = false;
            self.chosen_model = None;
        }
    }

    /// Stores the outcome of verifying `api_key` against `provider`. Ignored
    /// when the settings changed while the verification was running.
    pub fn record_ping(&mut self, provider: ProviderKind, api_key: &str, outcome: &PingOutcome) -> bool {
        if provider != self.provider || api_key.trim() != self.api_key {
            debug!("Discarding stale verification result for {}", provider.label());
            return false;
        }
        self.verified = outcome.ok;
        self.chosen_model = if outcome.ok {
            outcome.chosen_model.clone()
        } else {
            None
        };
        if outcome.ok {
            info!(
                "{} session verified (model: {})",
                provider.label(),
                self.chosen_model.as_deref().unwrap_or("provider default")
            );
        }
        true
    }

    /// Model to generate with: the remembered one, else the provider default.
    pub fn generation_model(&self, provider: &dyn AiProvider) -> String {
        self.chosen_model()
            .unwrap_or_else(|| provider.default_model())
            .to_string()
    }

    pub fn view(&self) -> SettingsView {
        SettingsView {
            provider: self.provider,
            has_api_key: self.api_key().is_some(),
            api_key_hint: self.api_key().map(mask_key),
            verified: self.verified,
            chosen_model: self.chosen_model.clone(),
        }
    }
}

/// Last four characters of the key, the rest masked.
fn mask_key(key: &str) -> String {
    let total = key.chars().count();
    let tail: String = key.chars().skip(total.saturating_sub(4)).collect();
    format!("****{tail}")
}

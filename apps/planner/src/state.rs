use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::llm_client::{AiProvider, GeminiProvider, OpenAiProvider, ProviderKind};
use crate::settings::SessionSettings;
use crate::sheet::SpreadsheetTemplate;

/// One adapter per supported vendor. Handlers pick the one the session selects.
#[derive(Clone)]
pub struct Providers {
    pub gemini: Arc<dyn AiProvider>,
    pub openai: Arc<dyn AiProvider>,
}

impl Providers {
    pub fn from_config(config: &Config) -> Self {
        let gemini = match &config.gemini_base_url {
            Some(url) => GeminiProvider::with_base_url(url.as_str()),
            None => GeminiProvider::new(),
        };
        let openai = match &config.openai_base_url {
            Some(url) => OpenAiProvider::with_base_url(url.as_str()),
            None => OpenAiProvider::new(),
        };
        Self {
            gemini: Arc::new(gemini),
            openai: Arc::new(openai),
        }
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn AiProvider> {
        match kind {
            ProviderKind::Gemini => Arc::clone(&self.gemini),
            ProviderKind::OpenAi => Arc::clone(&self.openai),
        }
    }
}

/// A generated spreadsheet kept in memory for download.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub unit_name: String,
    pub file_name: String,
    pub bytes: Bytes,
    pub generated_at: DateTime<Utc>,
}

/// Generated spreadsheets by id, holding at most `capacity` entries. Inserting
/// past the cap evicts the oldest insertion.
#[derive(Debug)]
pub struct ResultStore {
    capacity: usize,
    order: VecDeque<Uuid>,
    entries: HashMap<Uuid, StoredResult>,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: Uuid, result: StoredResult) {
        if self.entries.insert(id, result).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(evicted) = self.entries.remove(&oldest) {
                    debug!("Evicted stored plan {} ({})", oldest, evicted.file_name);
                }
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&StoredResult> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub settings: Arc<RwLock<SessionSettings>>,
    pub providers: Providers,
    /// Loaded once at startup; every render starts from a copy.
    pub template: SpreadsheetTemplate,
    pub results: Arc<RwLock<ResultStore>>,
}

impl AppState {
    pub fn new(config: Config, providers: Providers, template: SpreadsheetTemplate) -> Self {
        let settings = SessionSettings::new(config.ai_provider, config.ai_api_key.clone());
        let results = ResultStore::new(config.max_stored_results);
        Self {
            config,
            settings: Arc::new(RwLock::new(settings)),
            providers,
            template,
            results: Arc::new(RwLock::new(results)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str) -> StoredResult {
        StoredResult {
            unit_name: name.to_string(),
            file_name: format!("Plan_{name}_Subject.xlsx"),
            bytes: Bytes::from_static(b"xlsx"),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_store_evicts_oldest_past_capacity() {
        let mut store = ResultStore::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (id, name) in ids.iter().zip(["SA1", "SA2", "SA3"]) {
            store.insert(*id, stored(name));
        }

        assert_eq!(store.len(), 2);
        assert!(store.get(&ids[0]).is_none());
        assert_eq!(store.get(&ids[1]).unwrap().unit_name, "SA2");
        assert_eq!(store.get(&ids[2]).unwrap().unit_name, "SA3");
    }

    #[test]
    fn test_store_reinsert_does_not_grow() {
        let mut store = ResultStore::new(2);
        let id = Uuid::new_v4();
        store.insert(id, stored("SA1"));
        store.insert(id, stored("SA1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.order.len(), 1);
    }
}

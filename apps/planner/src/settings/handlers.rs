//! Axum route handlers for the Settings API.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use crate::llm_client::PingOutcome;
use crate::settings::{SettingsUpdate, SettingsView};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub outcome: PingOutcome,
    pub settings: SettingsView,
}

/// GET /api/v1/settings
pub async fn handle_get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    Json(state.settings.read().await.view())
}

/// PUT /api/v1/settings
///
/// Changing the provider or the key requires a new verification.
pub async fn handle_update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SettingsView> {
    let mut settings = state.settings.write().await;
    settings.update(update);
    info!("Session provider set to {}", settings.provider().label());
    Json(settings.view())
}

/// POST /api/v1/settings/verify
///
/// Probes the provider's candidate models with the configured key. The
/// settings lock is not held while the provider is being called.
pub async fn handle_verify(State(state): State<AppState>) -> Json<VerifyResponse> {
    let (kind, api_key) = {
        let settings = state.settings.read().await;
        (
            settings.provider(),
            settings.api_key().unwrap_or_default().to_string(),
        )
    };

    let outcome = state.providers.get(kind).ping(&api_key).await;

    let mut settings = state.settings.write().await;
    settings.record_ping(kind, &api_key, &outcome);
    Json(VerifyResponse {
        outcome,
        settings: settings.view(),
    })
}

mod config;
mod errors;
mod extract;
mod llm_client;
mod planning;
mod routes;
mod settings;
mod sheet;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::routes::build_router;
use crate::sheet::SpreadsheetTemplate;
use crate::state::{AppState, Providers};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting planner v{}", env!("CARGO_PKG_VERSION"));

    // Load the spreadsheet template once; every render starts from a copy of it
    let template = SpreadsheetTemplate::from_path(&config.template_path)?;
    info!("Spreadsheet template loaded from {}", config.template_path.display());

    // Initialize AI provider adapters
    let providers = Providers::from_config(&config);
    info!(
        "AI providers initialized (session provider: {}, key preloaded: {})",
        config.ai_provider.label(),
        config.ai_api_key.is_some()
    );

    // Build app state
    let state = AppState::new(config.clone(), providers, template);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

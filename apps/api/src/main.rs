mod config;
mod documents;
mod errors;
mod llm_client;
mod ranking;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::{LlmClient, RetryPolicy};
use crate::ranking::{PipelineSettings, RankingPipeline};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Optional plain-text copy of the log stream
    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{path}'"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting Ranker API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client
    let llm = LlmClient::new(
        config.google_api_key.clone(),
        config.ai_base_url.clone(),
        config.ai_timeout,
        RetryPolicy {
            max_attempts: config.ai_max_attempts,
            ..RetryPolicy::default()
        },
    )?;
    info!(
        "LLM client initialized (model: {}, attempts: {})",
        llm_client::MODEL,
        config.ai_max_attempts
    );

    let pipeline = RankingPipeline::new(
        Arc::new(llm),
        PipelineSettings {
            scoring_concurrency: config.scoring_concurrency,
            ..PipelineSettings::default()
        },
    );

    // Build app state
    let state = AppState {
        pipeline,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!(
        "Listening on {addr} (max {} resumes, {} bytes per file)",
        config.max_resumes, config.max_document_bytes
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

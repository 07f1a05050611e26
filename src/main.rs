// =============================================================================
// Reversion Engine — Main Entry Point
// =============================================================================
//
// Streams last-digit ticks from Deriv, watches the high/low split of the
// last 100 digits and publishes a mean-reversion signal with a 120 s
// countdown whenever one side dominates.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod access;
mod api;
mod app_state;
mod engine;
mod error;
mod market_data;
mod poll_audit;
mod runtime_config;
mod signals;
mod strategy_template;
mod types;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::access::AccessList;
use crate::app_state::AppState;
use crate::engine::SignalEngine;
use crate::error::EngineError;
use crate::market_data::DerivTickSource;
use crate::runtime_config::RuntimeConfig;
use crate::strategy_template::StrategyTemplate;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Reversion Engine — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(symbol) = std::env::var("REVERSION_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.feed.symbol = symbol;
        }
    }
    if let Ok(app_id) = std::env::var("DERIV_APP_ID") {
        if !app_id.trim().is_empty() {
            config.feed.app_id = app_id.trim().to_string();
        }
    }

    info!(
        symbol = %config.feed.symbol,
        buffer_capacity = config.buffer_capacity,
        min_samples = config.analyzer.min_samples,
        min_confidence = config.lifecycle.min_confidence,
        "Engine configuration"
    );

    let access_list = match &config.access_list_path {
        Some(path) => AccessList::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load access list, admitting admin token only");
            AccessList::default()
        }),
        None => AccessList::default(),
    };

    let strategy_template = config
        .strategy_template_path
        .as_ref()
        .and_then(|path| match StrategyTemplate::load(path) {
            Ok(template) => Some(template),
            Err(e) => {
                warn!(error = %e, "Failed to load strategy template, injection disabled");
                None
            }
        });

    // ── 2. Engine & shared state ─────────────────────────────────────────
    let api_token = std::env::var("DERIV_API_TOKEN").ok();
    let source = Arc::new(DerivTickSource::new(config.feed.clone(), api_token));
    let engine = Arc::new(SignalEngine::new(&config, source));
    let retry_backoff = config.feed.reconnect_backoff();

    let state = Arc::new(AppState::new(
        config,
        engine.clone(),
        access_list,
        strategy_template,
    ));

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("REVERSION_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 4. Start the engine (retry until the upstream answers) ───────────
    let start_state = state.clone();
    tokio::spawn(async move {
        loop {
            match start_state.engine.start().await {
                Ok(()) => break,
                Err(EngineError::Cancelled) => {
                    info!("Engine start cancelled — not retrying");
                    break;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_secs = retry_backoff.as_secs(),
                        "Engine start failed — retrying"
                    );
                    start_state.push_error(e.to_string());
                    tokio::time::sleep(retry_backoff).await;
                }
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    engine.stop();
    state.detach_events();

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Reversion Engine shut down complete.");
    Ok(())
}

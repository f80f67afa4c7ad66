// =============================================================================
// Meridian Paper Desk — Main Entry Point
// =============================================================================
//
// Two independent stream connections feed the desk: the depth diff stream
// drives the order book synchroniser, the trade stream drives the candle
// aggregator. The risk engine executes simulated orders against the
// synchronised book; the HTTP surface is the only way in or out.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod feed;
mod market_data;
mod risk;
mod store;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::RuntimeConfig;
use crate::feed::connection::{ConnectionStatus, StreamConfig, StreamConnection};
use crate::feed::rest::MarketClient;

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
    info!("║        Meridian Paper Desk — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut cfg = RuntimeConfig::load("meridian.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override symbol from env if available.
    if let Ok(sym) = std::env::var("MERIDIAN_SYMBOL") {
        let sym = sym.trim().to_uppercase();
        if !sym.is_empty() {
            cfg.symbol = sym;
        }
    }

    info!(
        symbol = %cfg.symbol,
        depth_limit = cfg.depth_limit,
        max_candles = cfg.max_candles,
        "Configured market"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let (depth_status_tx, depth_status_rx) = watch::channel(ConnectionStatus::default());
    let (trade_status_tx, trade_status_rx) = watch::channel(ConnectionStatus::default());

    let state = Arc::new(AppState::new(cfg, depth_status_rx, trade_status_rx)?);
    let client = MarketClient::new(state.config.rest_base_url.clone());

    // ── 3. Depth stream → order book synchroniser ────────────────────────
    let depth_cfg = StreamConfig::from_runtime(
        &state.config,
        feed::depth_stream_url(&state.config.ws_base_url, &state.config.symbol),
    );
    let (depth_handle, depth_events) = StreamConnection::spawn(depth_cfg, depth_status_tx);

    let book_state = state.clone();
    let snapshot_symbol = state.config.symbol.clone();
    let snapshot_limit = state.config.depth_limit;
    let fetch_snapshot = move || {
        let client = client.clone();
        let symbol = snapshot_symbol.clone();
        async move { client.depth_snapshot(&symbol, snapshot_limit).await }
    };
    tokio::spawn(async move {
        if let Err(e) = feed::run_book_sync(book_state, depth_events, fetch_snapshot).await {
            error!(error = %e, "Book sync pump stopped");
        }
    });

    // ── 4. Trade stream → candle aggregator ──────────────────────────────
    let trade_cfg = StreamConfig::from_runtime(
        &state.config,
        feed::trade_stream_url(&state.config.ws_base_url, &state.config.symbol),
    );
    let (trade_handle, trade_events) = StreamConnection::spawn(trade_cfg, trade_status_tx);
    tokio::spawn(feed::run_trade_pump(state.clone(), trade_events));

    info!("Market data streams launched");

    // ── 5. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    // Tearing the connections down cancels any pending reconnect timer and
    // closes the event channels, which stops both pump tasks.
    depth_handle.disconnect().await;
    trade_handle.disconnect().await;

    state.candles.write().force_finalize();
    state.publish_candles();

    info!("Meridian Paper Desk shut down complete.");
    Ok(())
}

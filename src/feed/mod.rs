// =============================================================================
// Feed layer — stream connections, typed events, snapshot client, and the
// pump tasks that drive market data into the shared state
// =============================================================================

pub mod connection;
pub mod events;
pub mod rest;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::feed::events::FeedEvent;
use crate::feed::rest::DepthSnapshot;
use crate::market_data::DiffOutcome;

/// Stream path for the incremental depth feed.
pub fn depth_stream_url(ws_base: &str, symbol: &str) -> String {
    format!("{}/ws/{}@depth@100ms", ws_base, symbol.to_lowercase())
}

/// Stream path for the raw trade feed.
pub fn trade_stream_url(ws_base: &str, symbol: &str) -> String {
    format!("{}/ws/{}@trade", ws_base, symbol.to_lowercase())
}

// ---------------------------------------------------------------------------
// Book synchronisation pump
// ---------------------------------------------------------------------------

/// Seed the book from a snapshot, then reconcile incremental diffs.
///
/// The snapshot source is a caller-supplied fetch so the pump can be
/// driven against canned data. A sequence gap discards local state and
/// re-fetches a snapshot exactly once per mismatch. Snapshot failures
/// propagate to the caller — retry policy belongs there, not here. Runs
/// until the event channel closes (stream torn down), which also
/// guarantees no snapshot completes into a torn-down session.
pub async fn run_book_sync<F, Fut>(
    state: Arc<AppState>,
    mut events: mpsc::UnboundedReceiver<FeedEvent>,
    fetch_snapshot: F,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<DepthSnapshot>>,
{
    let symbol = state.config.symbol.clone();

    let snapshot = fetch_snapshot()
        .await
        .context("initial order book snapshot failed")?;
    state.order_book.write().apply_snapshot(&snapshot)?;
    state.publish_book();
    info!(symbol = %symbol, "order book synchronised");

    while let Some(event) = events.recv().await {
        let diff = match event {
            FeedEvent::Depth(diff) => diff,
            other => {
                warn!(event = ?other, "unexpected event on depth stream — ignoring");
                continue;
            }
        };

        let outcome = state.order_book.write().apply_diff(&diff);
        if outcome == DiffOutcome::OutOfSync {
            // State is held stale until the resync lands; nothing invalid
            // is published in between.
            let snapshot = fetch_snapshot()
                .await
                .context("resync snapshot failed")?;
            state.order_book.write().apply_snapshot(&snapshot)?;
            info!(symbol = %symbol, "order book resynchronised after sequence gap");
        }
        state.publish_book();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Trade aggregation pump
// ---------------------------------------------------------------------------

/// Fold the trade stream into 1-minute candles, republishing the visible
/// candle sequence after every trade. Runs until the event channel closes.
pub async fn run_trade_pump(state: Arc<AppState>, mut events: mpsc::UnboundedReceiver<FeedEvent>) {
    while let Some(event) = events.recv().await {
        let trade_event = match event {
            FeedEvent::Trade(ev) => ev,
            other => {
                warn!(event = ?other, "unexpected event on trade stream — ignoring");
                continue;
            }
        };

        match trade_event.to_trade() {
            Ok(trade) => {
                state.candles.write().add_trade(&trade);
                state.publish_candles();
            }
            Err(e) => warn!(error = %e, "dropping unparseable trade"),
        }
    }
}

// =============================================================================
// Central Application State — Meridian Paper Desk
// =============================================================================
//
// The single source of truth the stream pumps write into and the HTTP
// surface reads from. Mutable collections live behind parking_lot::RwLock;
// every consumer-facing output (book view, candle sequence, balances,
// per-stream connection status) is also published on a tokio watch channel
// so collaborators get change notifications without polling the locks.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::RuntimeConfig;
use crate::feed::connection::ConnectionStatus;
use crate::market_data::{Candle, CandleAggregator, OrderBook, OrderBookView};
use crate::risk::RiskEngine;
use crate::store::JsonOrderStore;
use crate::types::Balances;

/// Levels per side included in each published book view.
const BOOK_VIEW_DEPTH: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub config: RuntimeConfig,

    // ── Market data ─────────────────────────────────────────────────────
    pub order_book: RwLock<OrderBook>,
    pub candles: RwLock<CandleAggregator>,

    // ── Risk ────────────────────────────────────────────────────────────
    pub risk_engine: Arc<RiskEngine>,

    // ── Notification channels ───────────────────────────────────────────
    book_tx: watch::Sender<OrderBookView>,
    pub book_rx: watch::Receiver<OrderBookView>,
    candles_tx: watch::Sender<Vec<Candle>>,
    pub candles_rx: watch::Receiver<Vec<Candle>>,
    pub balances_rx: watch::Receiver<Balances>,

    // ── Stream health (senders live with the connections) ───────────────
    pub depth_status_rx: watch::Receiver<ConnectionStatus>,
    pub trade_status_rx: watch::Receiver<ConnectionStatus>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct the shared state, loading the persisted order log. Fails
    /// only when the order log exists but cannot be parsed.
    ///
    /// The connection-status receivers come from the caller because the
    /// matching senders are owned by the stream connection actors.
    pub fn new(
        config: RuntimeConfig,
        depth_status_rx: watch::Receiver<ConnectionStatus>,
        trade_status_rx: watch::Receiver<ConnectionStatus>,
    ) -> anyhow::Result<Self> {
        let starting = Balances::new(config.starting_cash, config.starting_asset);
        let (balances_tx, balances_rx) = watch::channel(starting);

        let store = Arc::new(JsonOrderStore::new(config.orders_path.clone()));
        let risk_engine = Arc::new(RiskEngine::new(
            starting,
            config.max_order_history,
            store,
            balances_tx,
        )?);

        let (book_tx, book_rx) = watch::channel(OrderBookView::default());
        let (candles_tx, candles_rx) = watch::channel(Vec::new());

        Ok(Self {
            order_book: RwLock::new(OrderBook::new(config.depth_limit, config.vwap_depth)),
            candles: RwLock::new(CandleAggregator::new(config.max_candles)),
            risk_engine,
            book_tx,
            book_rx,
            candles_tx,
            candles_rx,
            balances_rx,
            depth_status_rx,
            trade_status_rx,
            start_time: std::time::Instant::now(),
            config,
        })
    }

    /// Publish the current book view to the notification channel.
    pub fn publish_book(&self) {
        let view = self.order_book.read().view(BOOK_VIEW_DEPTH);
        self.book_tx.send_replace(view);
    }

    /// Publish the full visible candle sequence (history + open candle).
    pub fn publish_candles(&self) {
        let candles = self.candles.read().candles();
        self.candles_tx.send_replace(candles);
    }
}

// =============================================================================
// Candle Aggregator — fixed 1-minute OHLCV buckets from the trade stream
// =============================================================================
//
// Trades are bucketed by flooring their timestamp to the interval. Exactly
// one open (unfinalized) candle exists at a time; finalized candles are
// immutable and held in a ring capped at `max_candles` (oldest dropped, the
// open candle is never dropped).
//
// Late trades — a trade whose bucket is older than the current open bucket —
// are rejected and logged rather than reopening a historical bucket, so the
// visible sequence stays chronological.
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::Trade;

/// Fixed bucket width: one minute.
pub const CANDLE_INTERVAL_MS: i64 = 60_000;

/// One OHLCV bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    /// Epoch millis truncated to the interval.
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    fn from_trade(bucket_start: i64, trade: &Trade) -> Self {
        Self {
            bucket_start,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
        }
    }
}

pub struct CandleAggregator {
    /// Finalized candles, oldest first.
    history: VecDeque<Candle>,
    /// The single open (still-mutating) candle, if any.
    open: Option<Candle>,
    max_candles: usize,
}

impl CandleAggregator {
    /// Retain at most `max_candles` finalized candles plus one open candle.
    pub fn new(max_candles: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_candles + 1),
            open: None,
            max_candles,
        }
    }

    // -------------------------------------------------------------------------
    // Ingest
    // -------------------------------------------------------------------------

    /// Fold one trade into its bucket.
    pub fn add_trade(&mut self, trade: &Trade) {
        let bucket = trade.timestamp - trade.timestamp.rem_euclid(CANDLE_INTERVAL_MS);

        match &mut self.open {
            Some(candle) if candle.bucket_start == bucket => {
                candle.high = candle.high.max(trade.price);
                candle.low = candle.low.min(trade.price);
                candle.close = trade.price;
                candle.volume += trade.quantity;
            }
            Some(candle) if bucket < candle.bucket_start => {
                // Late trade for an already-rolled bucket.
                warn!(
                    trade_id = trade.id,
                    trade_bucket = bucket,
                    open_bucket = candle.bucket_start,
                    "dropping out-of-order trade for a closed bucket"
                );
            }
            Some(_) => {
                self.finalize_open();
                self.open = Some(Candle::from_trade(bucket, trade));
                debug!(bucket_start = bucket, "candle bucket rolled");
            }
            None => {
                self.open = Some(Candle::from_trade(bucket, trade));
            }
        }
    }

    /// Apply trades sequentially in the caller's order — no reordering here.
    pub fn add_trades(&mut self, trades: &[Trade]) {
        for trade in trades {
            self.add_trade(trade);
        }
    }

    /// Finalize the open candle immediately (session flush).
    pub fn force_finalize(&mut self) {
        self.finalize_open();
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Finalized history plus the open candle, oldest first.
    pub fn candles(&self) -> Vec<Candle> {
        let mut out: Vec<Candle> = self.history.iter().copied().collect();
        if let Some(open) = self.open {
            out.push(open);
        }
        out
    }

    /// Number of finalized candles currently retained.
    pub fn finalized_count(&self) -> usize {
        self.history.len()
    }

    /// Last finalized close minus first retained finalized open. Zero when
    /// fewer than 2 finalized candles exist. Window-relative by definition:
    /// once the ring drops old candles the baseline moves with it.
    pub fn price_change(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) => last.close - first.open,
            _ => 0.0,
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn finalize_open(&mut self) {
        if let Some(candle) = self.open.take() {
            self.history.push_back(candle);
            while self.history.len() > self.max_candles {
                self.history.pop_front();
            }
        }
    }
}

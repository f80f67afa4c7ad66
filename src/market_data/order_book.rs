// =============================================================================
// Order Book — snapshot + sequenced diff reconciliation for one symbol
// =============================================================================
//
// Pure synchronous state machine: network I/O lives in the stream pump, the
// book only applies events. A diff is accepted only when its first covered
// sequence immediately follows `last_sequence_id`; any gap means the local
// state is stale and the caller must re-seed from a fresh snapshot.
//
// Sides are kept fully sorted (bids descending, asks ascending) and re-sorted
// per update. That is a full side re-sort, not an incremental insertion —
// side sizes are capped at `depth_limit`, so the cost is bounded.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::feed::events::{DepthDiff, RawLevel};
use crate::feed::rest::DepthSnapshot;

/// One price level. `cumulative` is the running quantity sum from the best
/// price outward; a level with zero quantity does not exist in the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
    pub cumulative: f64,
}

/// Result of applying one diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Sequence matched; the book advanced to the diff's final sequence.
    Applied,
    /// Sequence gap — local state is stale, re-seed from a snapshot. The
    /// diff was not merged.
    OutOfSync,
}

/// Serialisable view of the book for the notification channel and API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderBookView {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_sequence_id: u64,
    pub spread: f64,
    pub mid_price: f64,
    pub vwap: f64,
}

pub struct OrderBook {
    /// Sorted descending by price.
    bids: Vec<PriceLevel>,
    /// Sorted ascending by price.
    asks: Vec<PriceLevel>,
    last_sequence_id: u64,
    depth_limit: usize,
    vwap_depth: usize,
    spread: f64,
    mid_price: f64,
    vwap: f64,
}

impl OrderBook {
    pub fn new(depth_limit: usize, vwap_depth: usize) -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            last_sequence_id: 0,
            depth_limit,
            vwap_depth,
            spread: 0.0,
            mid_price: 0.0,
            vwap: 0.0,
        }
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// Replace the whole book from a snapshot and record its sequence id.
    pub fn apply_snapshot(&mut self, snapshot: &DepthSnapshot) -> Result<()> {
        self.bids = Self::parse_side(&snapshot.bids)?;
        self.asks = Self::parse_side(&snapshot.asks)?;
        Self::sort_side(&mut self.bids, true);
        Self::sort_side(&mut self.asks, false);
        self.bids.truncate(self.depth_limit);
        self.asks.truncate(self.depth_limit);
        self.last_sequence_id = snapshot.last_update_id;
        self.recompute();

        debug!(
            last_sequence_id = self.last_sequence_id,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "order book seeded from snapshot"
        );
        Ok(())
    }

    /// Merge one incremental update, or report a sequence gap.
    ///
    /// On `OutOfSync` the book is left untouched; `last_sequence_id` never
    /// decreases.
    pub fn apply_diff(&mut self, diff: &DepthDiff) -> DiffOutcome {
        let expected = self.last_sequence_id + 1;
        if diff.first_update_id != expected {
            warn!(
                first_update_id = diff.first_update_id,
                expected,
                "sequence gap in depth stream — book is stale"
            );
            return DiffOutcome::OutOfSync;
        }

        Self::merge_side(&mut self.bids, &diff.bids, true, self.depth_limit);
        Self::merge_side(&mut self.asks, &diff.asks, false, self.depth_limit);
        self.last_sequence_id = diff.final_update_id;
        self.recompute();
        DiffOutcome::Applied
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// First `n` levels of each side in display order. Never mutates.
    pub fn top_levels(&self, n: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (
            self.bids.iter().take(n).copied().collect(),
            self.asks.iter().take(n).copied().collect(),
        )
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.last_sequence_id
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    pub fn mid_price(&self) -> f64 {
        self.mid_price
    }

    pub fn vwap(&self) -> f64 {
        self.vwap
    }

    /// Build a view of the top `depth` levels plus derived metrics.
    pub fn view(&self, depth: usize) -> OrderBookView {
        let (bids, asks) = self.top_levels(depth);
        OrderBookView {
            bids,
            asks,
            last_sequence_id: self.last_sequence_id,
            spread: self.spread,
            mid_price: self.mid_price,
            vwap: self.vwap,
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn parse_side(raw: &[RawLevel]) -> Result<Vec<PriceLevel>> {
        let mut levels = Vec::with_capacity(raw.len());
        for pair in raw {
            let (price, quantity) = pair.parse()?;
            if quantity > 0.0 {
                levels.push(PriceLevel {
                    price,
                    quantity,
                    cumulative: 0.0,
                });
            }
        }
        Ok(levels)
    }

    fn sort_side(levels: &mut [PriceLevel], descending: bool) {
        if descending {
            levels.sort_by(|a, b| b.price.total_cmp(&a.price));
        } else {
            levels.sort_by(|a, b| a.price.total_cmp(&b.price));
        }
    }

    /// Apply per-price quantity changes to one side: a non-positive quantity
    /// removes the level, anything else sets/replaces it. A level with
    /// quantity <= 0 never exists in the book — snapshots filter the same
    /// way in `parse_side`. Unparseable pairs are dropped and logged — one
    /// bad pair never poisons the rest of the diff.
    fn merge_side(levels: &mut Vec<PriceLevel>, changes: &[RawLevel], descending: bool, cap: usize) {
        let mut by_price: HashMap<u64, f64> = levels
            .iter()
            .map(|l| (l.price.to_bits(), l.quantity))
            .collect();

        for pair in changes {
            match pair.parse() {
                Ok((price, quantity)) => {
                    if quantity <= 0.0 {
                        by_price.remove(&price.to_bits());
                    } else {
                        by_price.insert(price.to_bits(), quantity);
                    }
                }
                Err(e) => warn!(error = %e, "dropping unparseable depth level"),
            }
        }

        *levels = by_price
            .into_iter()
            .map(|(bits, quantity)| PriceLevel {
                price: f64::from_bits(bits),
                quantity,
                cumulative: 0.0,
            })
            .collect();
        Self::sort_side(levels, descending);
        levels.truncate(cap);
    }

    /// Recompute cumulative depth and the derived spread/mid/VWAP metrics.
    /// When either side is empty all three metrics are zero — a defined
    /// "no market" state, not an error.
    fn recompute(&mut self) {
        for side in [&mut self.bids, &mut self.asks] {
            let mut running = 0.0;
            for level in side.iter_mut() {
                running += level.quantity;
                level.cumulative = running;
            }
        }

        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) => {
                self.spread = ask.price - bid.price;
                self.mid_price = (bid.price + ask.price) / 2.0;

                let top = self
                    .bids
                    .iter()
                    .take(self.vwap_depth)
                    .chain(self.asks.iter().take(self.vwap_depth));
                let (notional, volume) = top.fold((0.0, 0.0), |(n, v), l| {
                    (n + l.price * l.quantity, v + l.quantity)
                });
                self.vwap = if volume > 0.0 { notional / volume } else { 0.0 };
            }
            _ => {
                self.spread = 0.0;
                self.mid_price = 0.0;
                self.vwap = 0.0;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn raw(price: &str, qty: &str) -> RawLevel {
        RawLevel(price.to_string(), qty.to_string())
    }

    fn sample_snapshot() -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: 100,
            bids: vec![raw("50000", "1.5"), raw("49999", "2.0")],
            asks: vec![raw("50001", "1.0"), raw("50002", "1.5")],
        }
    }

    fn diff(first: u64, last: u64, bids: Vec<RawLevel>, asks: Vec<RawLevel>) -> DepthDiff {
        DepthDiff {
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            bids,
            asks,
        }
    }

    fn seeded_book() -> OrderBook {
        let mut book = OrderBook::new(1000, 20);
        book.apply_snapshot(&sample_snapshot()).unwrap();
        book
    }

    #[test]
    fn snapshot_seeds_sorted_sides() {
        let book = seeded_book();
        assert_eq!(book.last_sequence_id(), 100);
        let (bids, asks) = book.top_levels(10);
        assert_eq!(bids.len(), 2);
        assert_eq!(asks.len(), 2);
        // Bids descending, asks ascending.
        assert!((bids[0].price - 50_000.0).abs() < f64::EPSILON);
        assert!((bids[1].price - 49_999.0).abs() < f64::EPSILON);
        assert!((asks[0].price - 50_001.0).abs() < f64::EPSILON);
        assert!((asks[1].price - 50_002.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_sorts_unordered_input() {
        let mut book = OrderBook::new(1000, 20);
        book.apply_snapshot(&DepthSnapshot {
            last_update_id: 7,
            bids: vec![raw("49999", "2.0"), raw("50000", "1.5")],
            asks: vec![raw("50002", "1.5"), raw("50001", "1.0")],
        })
        .unwrap();
        assert_eq!(book.best_bid(), Some(50_000.0));
        assert_eq!(book.best_ask(), Some(50_001.0));
    }

    #[test]
    fn contiguous_diff_advances_sequence() {
        let mut book = seeded_book();
        let outcome = book.apply_diff(&diff(
            101,
            101,
            vec![raw("49999", "2.0")],
            vec![raw("50002", "1.5")],
        ));
        assert_eq!(outcome, DiffOutcome::Applied);
        assert_eq!(book.last_sequence_id(), 101);
        // No-op value update — levels unchanged.
        let (bids, asks) = book.top_levels(10);
        assert!((bids[1].quantity - 2.0).abs() < f64::EPSILON);
        assert!((asks[1].quantity - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sequence_gap_leaves_book_untouched() {
        let mut book = seeded_book();
        let outcome = book.apply_diff(&diff(102, 102, vec![raw("50000", "9.0")], vec![]));
        assert_eq!(outcome, DiffOutcome::OutOfSync);
        assert_eq!(book.last_sequence_id(), 100);
        let (bids, _) = book.top_levels(1);
        assert!((bids[0].quantity - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_quantity_removes_level() {
        let mut book = seeded_book();
        book.apply_diff(&diff(101, 101, vec![raw("49999", "0")], vec![]));
        let (bids, _) = book.top_levels(10);
        assert_eq!(bids.len(), 1);
        assert!((bids[0].price - 50_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_quantity_removes_and_never_inserts() {
        let mut book = seeded_book();
        // 49999 exists (removed), 49998 does not (must not appear).
        book.apply_diff(&diff(
            101,
            101,
            vec![raw("49999", "-1.0"), raw("49998", "-0.5")],
            vec![],
        ));
        let (bids, asks) = book.top_levels(10);
        assert!(bids.iter().chain(asks.iter()).all(|l| l.quantity > 0.0));
        assert_eq!(bids.len(), 1);
        assert!((bids[0].price - 50_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn diff_inserts_new_level_in_order() {
        let mut book = seeded_book();
        book.apply_diff(&diff(101, 102, vec![raw("49999.5", "0.7")], vec![]));
        let (bids, _) = book.top_levels(10);
        assert_eq!(bids.len(), 3);
        assert!((bids[1].price - 49_999.5).abs() < f64::EPSILON);
        assert_eq!(book.last_sequence_id(), 102);
    }

    #[test]
    fn cumulative_is_monotone_from_best_price() {
        let mut book = seeded_book();
        book.apply_diff(&diff(101, 101, vec![raw("49998", "0.5")], vec![]));
        let (bids, asks) = book.top_levels(10);
        for side in [&bids, &asks] {
            let mut previous = 0.0;
            for level in side.iter() {
                assert!(level.cumulative >= previous);
                previous = level.cumulative;
            }
        }
        assert!((bids.last().unwrap().cumulative - 4.0).abs() < 1e-9);
    }

    #[test]
    fn spread_and_mid_from_top_of_book() {
        let book = seeded_book();
        assert!((book.spread() - 1.0).abs() < f64::EPSILON);
        assert!((book.mid_price() - 50_000.5).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_zero_when_side_empty() {
        let mut book = OrderBook::new(1000, 20);
        book.apply_snapshot(&DepthSnapshot {
            last_update_id: 5,
            bids: vec![raw("50000", "1.0")],
            asks: vec![],
        })
        .unwrap();
        assert_eq!(book.spread(), 0.0);
        assert_eq!(book.mid_price(), 0.0);
        assert_eq!(book.vwap(), 0.0);
    }

    #[test]
    fn vwap_weights_by_quantity() {
        let book = seeded_book();
        // (50000*1.5 + 49999*2.0 + 50001*1.0 + 50002*1.5) / 6.0
        let expected = (50_000.0 * 1.5 + 49_999.0 * 2.0 + 50_001.0 + 50_002.0 * 1.5) / 6.0;
        assert!((book.vwap() - expected).abs() < 1e-9);
    }

    #[test]
    fn snapshot_drops_zero_quantity_levels() {
        let mut book = OrderBook::new(1000, 20);
        book.apply_snapshot(&DepthSnapshot {
            last_update_id: 9,
            bids: vec![raw("50000", "1.0"), raw("49999", "0")],
            asks: vec![raw("50001", "1.0")],
        })
        .unwrap();
        let (bids, _) = book.top_levels(10);
        assert_eq!(bids.len(), 1);
    }

    #[test]
    fn depth_limit_caps_each_side() {
        let mut book = OrderBook::new(2, 20);
        book.apply_snapshot(&DepthSnapshot {
            last_update_id: 1,
            bids: vec![raw("50000", "1"), raw("49999", "1"), raw("49998", "1")],
            asks: vec![raw("50001", "1"), raw("50002", "1"), raw("50003", "1")],
        })
        .unwrap();
        let (bids, asks) = book.top_levels(10);
        assert_eq!(bids.len(), 2);
        assert_eq!(asks.len(), 2);
        // The best levels survive the cap.
        assert_eq!(book.best_bid(), Some(50_000.0));
        assert_eq!(book.best_ask(), Some(50_001.0));
    }
}

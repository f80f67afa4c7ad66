// =============================================================================
// Typed inbound feed events — decoded once at the transport boundary
// =============================================================================
//
// Binance tags every stream frame with an `e` event-type field and encodes
// prices/quantities as decimal strings. The tagged decode here yields a
// closed set of typed events; everything downstream of the StreamConnection
// works with these, never with raw JSON.
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Trade;

/// A single `[price, quantity]` pair as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLevel(pub String, pub String);

impl RawLevel {
    /// Parse into `(price, quantity)`.
    pub fn parse(&self) -> Result<(f64, f64)> {
        let price: f64 = self
            .0
            .parse()
            .with_context(|| format!("failed to parse price '{}'", self.0))?;
        let quantity: f64 = self
            .1
            .parse()
            .with_context(|| format!("failed to parse quantity '{}'", self.1))?;
        Ok((price, quantity))
    }
}

/// An incremental depth update from the diff stream.
///
/// Expected shape:
/// ```json
/// { "e": "depthUpdate", "E": 1700000000000, "s": "BTCUSDT",
///   "U": 101, "u": 103, "b": [["50000.00", "1.5"]], "a": [["50001.00", "1.0"]] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DepthDiff {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<RawLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<RawLevel>,
}

/// A single trade from the trade stream.
///
/// Expected shape:
/// ```json
/// { "e": "trade", "E": 1700000000000, "s": "BTCUSDT", "t": 42,
///   "p": "50000.00", "q": "0.1", "T": 1700000000000, "m": true }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl TradeEvent {
    /// Normalize into a domain [`Trade`], parsing the decimal strings.
    ///
    /// `is_buyer_maker == true` means the resting order was a buy, so the
    /// taker sold.
    pub fn to_trade(&self) -> Result<Trade> {
        let price: f64 = self
            .price
            .parse()
            .with_context(|| format!("failed to parse trade price '{}'", self.price))?;
        let quantity: f64 = self
            .quantity
            .parse()
            .with_context(|| format!("failed to parse trade quantity '{}'", self.quantity))?;
        Ok(Trade {
            id: self.trade_id,
            price,
            quantity,
            timestamp: self.trade_time,
            taker_is_seller: self.is_buyer_maker,
        })
    }
}

/// Closed set of inbound events, discriminated by the wire `e` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum FeedEvent {
    #[serde(rename = "depthUpdate")]
    Depth(DepthDiff),
    #[serde(rename = "trade")]
    Trade(TradeEvent),
}

impl FeedEvent {
    /// Decode a raw text frame. Unknown event types and malformed payloads
    /// come back as errors; the connection drops and logs them.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to decode feed event")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_depth_update() {
        let json = r#"{
            "e": "depthUpdate", "E": 1700000000000, "s": "BTCUSDT",
            "U": 101, "u": 103,
            "b": [["50000.00", "1.5"], ["49999.00", "0"]],
            "a": [["50001.00", "1.0"]]
        }"#;
        let event = FeedEvent::decode(json).expect("should decode");
        match event {
            FeedEvent::Depth(diff) => {
                assert_eq!(diff.first_update_id, 101);
                assert_eq!(diff.final_update_id, 103);
                assert_eq!(diff.bids.len(), 2);
                let (price, qty) = diff.bids[0].parse().unwrap();
                assert!((price - 50_000.0).abs() < f64::EPSILON);
                assert!((qty - 1.5).abs() < f64::EPSILON);
            }
            other => panic!("expected depth event, got {other:?}"),
        }
    }

    #[test]
    fn decode_trade() {
        let json = r#"{
            "e": "trade", "E": 1700000000100, "s": "BTCUSDT", "t": 42,
            "p": "50000.50", "q": "0.25", "T": 1700000000050, "m": true
        }"#;
        let event = FeedEvent::decode(json).expect("should decode");
        match event {
            FeedEvent::Trade(ev) => {
                let trade = ev.to_trade().unwrap();
                assert_eq!(trade.id, 42);
                assert!((trade.price - 50_000.5).abs() < f64::EPSILON);
                assert!((trade.quantity - 0.25).abs() < f64::EPSILON);
                assert_eq!(trade.timestamp, 1_700_000_000_050);
                assert!(trade.taker_is_seller);
            }
            other => panic!("expected trade event, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_event_type() {
        let json = r#"{ "e": "kline", "s": "BTCUSDT" }"#;
        assert!(FeedEvent::decode(json).is_err());
    }

    #[test]
    fn decode_rejects_malformed_frame() {
        assert!(FeedEvent::decode("not json").is_err());
        assert!(FeedEvent::decode(r#"{"e": "trade"}"#).is_err());
    }

    #[test]
    fn raw_level_parse_rejects_garbage() {
        let level = RawLevel("abc".into(), "1.0".into());
        assert!(level.parse().is_err());
    }
}

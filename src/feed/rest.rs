// =============================================================================
// Market REST Client — public order-book snapshot fetch
// =============================================================================
//
// The desk only consumes public market data, so no request signing is
// involved. Failures carry full context and propagate to the caller; retry
// policy belongs to the stream layer, not here.
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::feed::events::RawLevel;

/// A full point-in-time order book snapshot plus its sequence id.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["50000.00", "1.5"], ...],
///   "asks": [["50001.00", "1.0"], ...]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

/// REST client for public market-data endpoints.
#[derive(Clone)]
pub struct MarketClient {
    base_url: String,
    client: reqwest::Client,
}

impl MarketClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// GET /api/v3/depth — fetch a full book snapshot for `symbol`.
    #[instrument(skip(self), name = "market::depth_snapshot")]
    pub async fn depth_snapshot(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url, symbol, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/depth request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET /api/v3/depth returned {status}: {body}");
        }

        let snapshot: DepthSnapshot = resp
            .json()
            .await
            .context("failed to parse depth snapshot response")?;

        debug!(
            symbol,
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "depth snapshot fetched"
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for MarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_deserialises_wire_shape() {
        let json = r#"{
            "lastUpdateId": 100,
            "bids": [["50000.00", "1.5"], ["49999.00", "2.0"]],
            "asks": [["50001.00", "1.0"], ["50002.00", "1.5"]]
        }"#;
        let snap: DepthSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.last_update_id, 100);
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.asks.len(), 2);
        let (price, qty) = snap.asks[1].parse().unwrap();
        assert!((price - 50_002.0).abs() < f64::EPSILON);
        assert!((qty - 1.5).abs() < f64::EPSILON);
    }
}

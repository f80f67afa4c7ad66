// =============================================================================
// Runtime Configuration — desk settings with atomic save
// =============================================================================
//
// Every tunable parameter of the desk lives here. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash, and all fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_depth_limit() -> usize {
    1000
}

fn default_vwap_depth() -> usize {
    20
}

fn default_max_candles() -> usize {
    120
}

fn default_max_order_history() -> usize {
    100
}

fn default_starting_cash() -> f64 {
    10_000.0
}

fn default_starting_asset() -> f64 {
    0.25
}

fn default_base_reconnect_delay_ms() -> u64 {
    500
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_orders_path() -> String {
    "orders.json".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian desk.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Market -------------------------------------------------------------
    /// Trading pair the desk mirrors (single-symbol by design).
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Base URL for REST snapshot fetches.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Base URL for the streaming feed.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    // --- Order book ---------------------------------------------------------
    /// Depth requested from the snapshot endpoint and retained per side.
    #[serde(default = "default_depth_limit")]
    pub depth_limit: usize,

    /// Number of top levels (per side, combined) used for the VWAP.
    #[serde(default = "default_vwap_depth")]
    pub vwap_depth: usize,

    // --- Candles ------------------------------------------------------------
    /// Maximum finalized 1-minute candles retained in memory.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    // --- Paper account ------------------------------------------------------
    /// Starting (and reset) quote-currency balance.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    /// Starting (and reset) base-asset balance.
    #[serde(default = "default_starting_asset")]
    pub starting_asset: f64,

    /// Maximum executed orders retained and persisted (oldest dropped first).
    #[serde(default = "default_max_order_history")]
    pub max_order_history: usize,

    /// Path of the executed-order JSON file.
    #[serde(default = "default_orders_path")]
    pub orders_path: String,

    // --- Stream connection --------------------------------------------------
    /// First reconnect delay; doubles per attempt up to the cap.
    #[serde(default = "default_base_reconnect_delay_ms")]
    pub base_reconnect_delay_ms: u64,

    /// Reconnect delay cap.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Attempt ceiling; beyond it the connection is terminally failed.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Interval between heartbeat pings on an open connection.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            depth_limit: default_depth_limit(),
            vwap_depth: default_vwap_depth(),
            max_candles: default_max_candles(),
            starting_cash: default_starting_cash(),
            starting_asset: default_starting_asset(),
            max_order_history: default_max_order_history(),
            orders_path: default_orders_path(),
            base_reconnect_delay_ms: default_base_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.depth_limit, 1000);
        assert_eq!(cfg.vwap_depth, 20);
        assert_eq!(cfg.max_candles, 120);
        assert_eq!(cfg.max_order_history, 100);
        assert!((cfg.starting_cash - 10_000.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_reconnect_delay_ms, 30_000);
        assert_eq!(cfg.max_reconnect_attempts, 10);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.base_reconnect_delay_ms, 500);
        assert_eq!(cfg.orders_path, "orders.json");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETHUSDT", "max_candles": 30 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.max_candles, 30);
        assert_eq!(cfg.depth_limit, 1000);
    }

    #[test]
    fn save_then_load_roundtrips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meridian.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "ETHUSDT".to_string();
        cfg.max_candles = 30;
        cfg.save(&path).unwrap();

        // The tmp file is renamed away, never left behind.
        assert!(!dir.path().join("meridian.json.tmp").exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbol, "ETHUSDT");
        assert_eq!(loaded.max_candles, 30);
        assert_eq!(loaded.depth_limit, cfg.depth_limit);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RuntimeConfig::load(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert_eq!(cfg.depth_limit, cfg2.depth_limit);
        assert_eq!(cfg.max_reconnect_attempts, cfg2.max_reconnect_attempts);
    }
}

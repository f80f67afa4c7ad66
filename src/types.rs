// =============================================================================
// Shared types used across the Meridian paper desk
// =============================================================================

use serde::{Deserialize, Serialize};

/// Side of a simulated order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Cash and asset held by the paper account. Both stay >= 0 after any
/// accepted mutation; the only writer is `RiskEngine::execute_order`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub cash: f64,
    pub asset: f64,
}

impl Balances {
    pub fn new(cash: f64, asset: f64) -> Self {
        Self { cash, asset }
    }
}

impl Default for Balances {
    fn default() -> Self {
        Self {
            cash: 10_000.0,
            asset: 0.0,
        }
    }
}

/// A filled simulated order. Append-only audit record; the only entity the
/// desk persists between sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedOrder {
    pub id: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub cost: f64,
    /// Epoch milliseconds at fill time.
    pub timestamp: i64,
}

/// A normalized trade from the exchange trade stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trade {
    /// Exchange-assigned id, kept for audit only — never deduplicated.
    pub id: u64,
    pub price: f64,
    pub quantity: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub taker_is_seller: bool,
}

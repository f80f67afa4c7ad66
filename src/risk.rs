// =============================================================================
// Risk Engine — balance-validated paper execution against the live book
// =============================================================================
//
// Validation is data, not errors: every rejection comes back as a structured
// result the trading surface can render. Execution is the single mutation
// path for balances — it re-checks sufficiency against the caller-supplied
// estimated price (the one previously validated), moves cash and asset in
// opposite directions of equal value, appends to the capped order log, and
// notifies the balances channel exactly once. A failed execution touches
// nothing.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::OrderStore;
use crate::types::{Balances, ExecutedOrder, OrderSide};

/// Price move used for the post-fill mark-to-market preview (+/- 0.5 %).
const PNL_MOVE_PCT: f64 = 0.005;

// ---------------------------------------------------------------------------
// Validation result
// ---------------------------------------------------------------------------

/// Outcome of validating an order against the current top-of-book and
/// balances.
#[derive(Debug, Clone, Serialize)]
pub struct OrderValidation {
    pub is_valid: bool,
    pub error: Option<String>,
    pub estimated_price: f64,
    pub estimated_cost: f64,
    /// Mark-to-market P&L if price moves +0.5 % right after the fill.
    pub pnl_up: f64,
    /// Mark-to-market P&L if price moves -0.5 % right after the fill.
    pub pnl_down: f64,
}

impl OrderValidation {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
            estimated_price: 0.0,
            estimated_cost: 0.0,
            pnl_up: 0.0,
            pnl_down: 0.0,
        }
    }
}

/// Absolute and percentage portfolio change between two price marks.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PortfolioChange {
    pub change: f64,
    pub change_percent: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RiskEngine {
    balances: RwLock<Balances>,
    orders: RwLock<Vec<ExecutedOrder>>,
    store: Arc<dyn OrderStore>,
    starting: Balances,
    max_order_history: usize,
    balances_tx: watch::Sender<Balances>,
}

impl RiskEngine {
    /// Create the engine, loading the persisted order log once. A corrupt
    /// log surfaces as an error to the caller.
    pub fn new(
        starting: Balances,
        max_order_history: usize,
        store: Arc<dyn OrderStore>,
        balances_tx: watch::Sender<Balances>,
    ) -> anyhow::Result<Self> {
        let orders = store.load()?;
        info!(
            cash = starting.cash,
            asset = starting.asset,
            prior_orders = orders.len(),
            "risk engine initialised"
        );

        Ok(Self {
            balances: RwLock::new(starting),
            orders: RwLock::new(orders),
            store,
            starting,
            max_order_history,
            balances_tx,
        })
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Validate an order against the current top-of-book and held balances.
    /// The order is assumed to cross the spread at the best available level;
    /// depth walking is not modelled.
    pub fn validate_order(
        &self,
        side: OrderSide,
        quantity: f64,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
    ) -> OrderValidation {
        if quantity <= 0.0 {
            return OrderValidation::invalid("quantity must be greater than 0");
        }

        let (best_bid, best_ask) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (bid, ask),
            _ => return OrderValidation::invalid("no market data available"),
        };

        let estimated_price = match side {
            OrderSide::Buy => best_ask,
            OrderSide::Sell => best_bid,
        };
        let estimated_cost = quantity * estimated_price;

        let balances = *self.balances.read();
        match side {
            OrderSide::Buy if estimated_cost > balances.cash => {
                return OrderValidation::invalid(format!(
                    "insufficient cash balance: required {:.2}, available {:.2}",
                    estimated_cost, balances.cash
                ));
            }
            OrderSide::Sell if quantity > balances.asset => {
                return OrderValidation::invalid(format!(
                    "insufficient asset balance: required {:.8}, available {:.8}",
                    quantity, balances.asset
                ));
            }
            _ => {}
        }

        let up = estimated_price * (1.0 + PNL_MOVE_PCT);
        let down = estimated_price * (1.0 - PNL_MOVE_PCT);
        let (pnl_up, pnl_down) = match side {
            OrderSide::Buy => (
                quantity * (up - estimated_price),
                quantity * (down - estimated_price),
            ),
            OrderSide::Sell => (
                quantity * (estimated_price - up),
                quantity * (estimated_price - down),
            ),
        };

        OrderValidation {
            is_valid: true,
            error: None,
            estimated_price,
            estimated_cost,
            pnl_up,
            pnl_down,
        }
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Execute at the previously validated price. The caller supplies the
    /// price from its validation pass so that a book move between validation
    /// and execution cannot change the fill terms.
    ///
    /// Returns `true` on success. On any failure balances and the order log
    /// are untouched and no notification fires.
    pub fn execute_order(&self, side: OrderSide, quantity: f64, estimated_price: f64) -> bool {
        if quantity <= 0.0 || estimated_price <= 0.0 {
            warn!(%side, quantity, estimated_price, "execution rejected: non-positive terms");
            return false;
        }

        let cost = quantity * estimated_price;
        let updated = {
            let mut balances = self.balances.write();
            match side {
                OrderSide::Buy => {
                    if cost > balances.cash {
                        warn!(
                            %side,
                            required = cost,
                            available = balances.cash,
                            "execution rejected: insufficient cash"
                        );
                        return false;
                    }
                    balances.cash -= cost;
                    balances.asset += quantity;
                }
                OrderSide::Sell => {
                    if quantity > balances.asset {
                        warn!(
                            %side,
                            required = quantity,
                            available = balances.asset,
                            "execution rejected: insufficient asset"
                        );
                        return false;
                    }
                    balances.cash += cost;
                    balances.asset -= quantity;
                }
            }
            *balances
        };

        let order = ExecutedOrder {
            id: Uuid::new_v4().to_string(),
            side,
            quantity,
            price: estimated_price,
            cost,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        {
            let mut orders = self.orders.write();
            orders.push(order.clone());
            while orders.len() > self.max_order_history {
                orders.remove(0);
            }
            // Best-effort persistence: a write failure loses history, not
            // the in-memory session.
            if let Err(e) = self.store.save(&orders) {
                warn!(error = %e, "failed to persist executed-order log");
            }
        }

        info!(
            id = %order.id,
            %side,
            quantity,
            price = estimated_price,
            cost,
            cash = updated.cash,
            asset = updated.asset,
            "paper order executed"
        );

        let _ = self.balances_tx.send(updated);
        true
    }

    /// Restore the configured starting balances and notify.
    pub fn reset_balances(&self) {
        let restored = {
            let mut balances = self.balances.write();
            *balances = self.starting;
            *balances
        };
        info!(cash = restored.cash, asset = restored.asset, "balances reset");
        let _ = self.balances_tx.send(restored);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn balances(&self) -> Balances {
        *self.balances.read()
    }

    /// Executed orders, oldest first.
    pub fn orders(&self) -> Vec<ExecutedOrder> {
        self.orders.read().clone()
    }

    /// `cash + asset * current_price`.
    pub fn portfolio_value(&self, current_price: f64) -> f64 {
        let balances = *self.balances.read();
        balances.cash + balances.asset * current_price
    }

    /// Portfolio value change between two price marks. Percent is 0 when
    /// the initial value is 0 (division guard, not an error).
    pub fn portfolio_change(&self, initial_price: f64, current_price: f64) -> PortfolioChange {
        let initial = self.portfolio_value(initial_price);
        let current = self.portfolio_value(current_price);
        let change = current - initial;
        let change_percent = if initial == 0.0 {
            0.0
        } else {
            change / initial * 100.0
        };
        PortfolioChange {
            change,
            change_percent,
        }
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("balances", &*self.balances.read())
            .field("starting", &self.starting)
            .field("max_order_history", &self.max_order_history)
            .finish()
    }
}

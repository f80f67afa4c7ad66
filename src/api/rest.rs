// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The trading surface talks to the desk exclusively through these endpoints;
// the desk renders nothing itself. Validation failures come back as a
// structured body with a 422 status so the surface can block submission and
// show the reason, never as an opaque 500.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::types::OrderSide;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/book", get(book))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/connection", get(connection))
        .route("/api/v1/balances", get(balances))
        .route("/api/v1/balances/reset", post(reset_balances))
        .route("/api/v1/orders", get(orders))
        .route("/api/v1/orders", post(place_order))
        .route("/api/v1/orders/validate", post(validate_order))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    symbol: String,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        symbol: state.config.symbol.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Market data
// =============================================================================

async fn book(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.book_rx.borrow().clone();
    Json(view)
}

async fn candles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sequence = state.candles_rx.borrow().clone();
    let price_change = state.candles.read().price_change();
    Json(serde_json::json!({
        "candles": sequence,
        "price_change": price_change,
    }))
}

async fn connection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let depth = state.depth_status_rx.borrow().clone();
    let trade = state.trade_status_rx.borrow().clone();
    Json(serde_json::json!({
        "depth": depth,
        "trade": trade,
    }))
}

// =============================================================================
// Balances & portfolio
// =============================================================================

async fn balances(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let balances = state.risk_engine.balances();
    let mid = state.order_book.read().mid_price();
    Json(serde_json::json!({
        "balances": balances,
        "portfolio_value": state.risk_engine.portfolio_value(mid),
        "mark_price": mid,
    }))
}

async fn reset_balances(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.risk_engine.reset_balances();
    info!("balances reset via API");
    Json(state.risk_engine.balances())
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Deserialize)]
struct OrderRequest {
    side: OrderSide,
    quantity: f64,
}

async fn orders(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.risk_engine.orders())
}

async fn validate_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> impl IntoResponse {
    let (best_bid, best_ask) = {
        let book = state.order_book.read();
        (book.best_bid(), book.best_ask())
    };
    let validation = state
        .risk_engine
        .validate_order(req.side, req.quantity, best_bid, best_ask);
    Json(validation)
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> impl IntoResponse {
    let (best_bid, best_ask) = {
        let book = state.order_book.read();
        (book.best_bid(), book.best_ask())
    };
    let validation = state
        .risk_engine
        .validate_order(req.side, req.quantity, best_bid, best_ask);

    if !validation.is_valid {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(validation)).into_response();
    }

    // Execution re-checks against the validated price, so a book move in
    // this gap cannot change the fill terms.
    let executed =
        state
            .risk_engine
            .execute_order(req.side, req.quantity, validation.estimated_price);
    if !executed {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "executed": false,
                "error": "balances changed between validation and execution",
            })),
        )
            .into_response();
    }

    info!(side = %req.side, quantity = req.quantity, "order placed via API");
    Json(serde_json::json!({
        "executed": true,
        "side": req.side,
        "quantity": req.quantity,
        "price": validation.estimated_price,
        "cost": validation.estimated_cost,
        "balances": state.risk_engine.balances(),
    }))
    .into_response()
}

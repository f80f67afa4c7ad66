// Market data: locally reconstructed order book + trade-derived candles.

pub mod candles;
pub mod order_book;

pub use candles::{Candle, CandleAggregator, CANDLE_INTERVAL_MS};
pub use order_book::{DiffOutcome, OrderBook, OrderBookView, PriceLevel};

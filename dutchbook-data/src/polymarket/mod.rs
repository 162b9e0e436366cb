//! Polymarket market data: CLOB WebSocket message models, the per-condition
//! pair book, and the feed task.

pub mod book;
pub mod message;
pub mod ws;

/// Market data WebSocket endpoint.
pub const WS_URL_POLYMARKET: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

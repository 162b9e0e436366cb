//! Kalshi market data: WebSocket message models, the bid-ladder book with
//! synthetic ask reconstruction, and the feed task.

pub mod book;
pub mod message;
pub mod ws;

/// Production WebSocket endpoint.
pub const WS_URL_KALSHI: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";

/// Demo environment WebSocket endpoint.
pub const WS_URL_KALSHI_DEMO: &str = "wss://demo-api.kalshi.co/trade-api/ws/v2";

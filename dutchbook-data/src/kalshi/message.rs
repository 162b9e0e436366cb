//! Kalshi WebSocket message models.
//!
//! All Kalshi WS messages share a wrapper format:
//! ```json
//! { "type": "<message_type>", "sid": <sub_id>, "seq": <seq_num>, "msg": { ... } }
//! ```
//!
//! Only bid ladders are delivered; asks are reconstructed by
//! [`crate::kalshi::book::KalshiBook`].

use serde::{Deserialize, Serialize};

/// Kalshi message variants received over the market data WebSocket.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KalshiMessage {
    /// Full book snapshot for one market.
    OrderbookSnapshot(KalshiBookSnapshot),
    /// Incremental change to a single bid level.
    OrderbookDelta(KalshiBookDelta),
    /// Market lifecycle event (close, settle, deactivate).
    #[serde(rename = "market_lifecycle_v2")]
    MarketLifecycle(KalshiLifecycle),
    /// Subscription acknowledgement.
    Subscribed(KalshiSubscribed),
    /// Server-reported error.
    Error(KalshiErrorMessage),
}

/// Book snapshot wrapper.
///
/// ### Raw payload
/// ```json
/// {
///   "type": "orderbook_snapshot",
///   "sid": 1,
///   "seq": 1,
///   "msg": {
///     "market_ticker": "KXBTC-25JAN31-T100000",
///     "yes": [[40, 100], [39, 200]],
///     "no": [[60, 150], [61, 250]]
///   }
/// }
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiBookSnapshot {
    pub sid: u64,
    pub seq: u64,
    pub msg: KalshiBookSnapshotData,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiBookSnapshotData {
    pub market_ticker: String,
    /// Yes bid levels as `(price_cents, quantity)`.
    #[serde(default)]
    pub yes: Vec<(u32, u32)>,
    /// No bid levels as `(price_cents, quantity)`.
    #[serde(default)]
    pub no: Vec<(u32, u32)>,
}

/// Book delta wrapper.
///
/// ### Raw payload
/// ```json
/// {
///   "type": "orderbook_delta",
///   "sid": 1,
///   "seq": 2,
///   "msg": { "market_ticker": "KXBTC-25JAN31-T100000", "price": 40, "delta": -50, "side": "yes" }
/// }
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiBookDelta {
    pub sid: u64,
    pub seq: u64,
    pub msg: KalshiBookDeltaData,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiBookDeltaData {
    pub market_ticker: String,
    /// Price level in cents (1-99).
    pub price: u32,
    /// Signed quantity change.
    pub delta: i32,
    /// `"yes"` or `"no"`.
    pub side: String,
}

/// Market lifecycle event wrapper.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiLifecycle {
    pub sid: u64,
    pub seq: u64,
    pub msg: KalshiLifecycleData,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiLifecycleData {
    pub market_ticker: String,
    /// `"closed"`, `"settled"`, `"determined"`, `"deactivated"`.
    pub event_type: String,
}

/// Subscription acknowledgement.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiSubscribed {
    pub sid: u64,
    #[serde(default)]
    pub seq: u64,
}

/// Server error payload.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiErrorMessage {
    pub msg: KalshiErrorData,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct KalshiErrorData {
    #[serde(default)]
    pub code: u32,
    #[serde(alias = "error_message")]
    pub msg: String,
}

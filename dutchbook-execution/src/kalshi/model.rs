//! Kalshi Trade API v2 request/response models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request body for POST /portfolio/orders.
#[derive(Debug, Clone, Serialize)]
pub struct KalshiCreateOrder {
    pub ticker: String,
    pub client_order_id: String,
    /// `"buy"` or `"sell"`.
    pub action: String,
    /// `"yes"` or `"no"`.
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub count: u32,
    /// Price in cents (1-99); exactly one of yes_price / no_price is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_ts: Option<i64>,
}

/// Response from POST /portfolio/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiOrderResponse {
    pub order: KalshiOrder,
}

/// A Kalshi order.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiOrder {
    pub order_id: String,
    pub ticker: String,
    pub status: String,
    pub action: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub yes_price: Option<u32>,
    pub no_price: Option<u32>,
    pub count: Option<u32>,
    pub remaining_count: Option<u32>,
}

impl KalshiOrder {
    /// Filled count = original count - remaining count.
    pub fn filled_count(&self) -> u32 {
        let total = self.count.unwrap_or(0);
        let remaining = self.remaining_count.unwrap_or(0);
        total.saturating_sub(remaining)
    }

    pub fn is_open(&self) -> bool {
        self.status == "resting"
    }

    /// Fill price in dollars for the side the order was placed on.
    pub fn price_decimal(&self) -> Option<Decimal> {
        let cents = match self.side.as_str() {
            "no" => self.no_price,
            _ => self.yes_price,
        }?;
        Some(Decimal::from(cents) / Decimal::from(100))
    }
}

/// Response from GET /portfolio/orders/{id}.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiGetOrderResponse {
    pub order: KalshiOrder,
}

/// Response from DELETE /portfolio/orders/{id}.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiCancelResponse {
    pub order: KalshiOrder,
    pub reduced_by: Option<u32>,
}

/// Response from GET /portfolio/balance. Balance is integer cents.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiBalanceResponse {
    pub balance: i64,
}

/// Response from GET /portfolio/fills.
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiFillsResponse {
    pub fills: Vec<KalshiFill>,
    pub cursor: Option<String>,
}

/// A fill (trade execution).
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiFill {
    pub trade_id: String,
    pub order_id: String,
    pub ticker: String,
    pub side: String,
    pub action: String,
    pub count: u32,
    pub yes_price: u32,
    pub no_price: u32,
    pub created_time: String,
}

/// Response from GET /markets/{ticker}/orderbook.
///
/// Bid arrays are `(price_cents, quantity)`; the no-bid side may be null,
/// which downstream treats as an empty ladder (synthetic ask = no liquidity).
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiBookResponse {
    pub orderbook: KalshiBookPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiBookPayload {
    #[serde(default, alias = "yes")]
    pub yes_bids: Option<Vec<(u32, u32)>>,
    #[serde(default, alias = "no")]
    pub no_bids: Option<Vec<(u32, u32)>>,
    #[serde(default)]
    pub is_provisional: bool,
}

impl KalshiBookPayload {
    pub fn yes_levels(&self) -> Vec<(u32, u32)> {
        self.yes_bids.clone().unwrap_or_default()
    }

    pub fn no_levels(&self) -> Vec<(u32, u32)> {
        self.no_bids.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_filled_count() {
        let order: KalshiOrder = serde_json::from_str(
            r#"{
                "order_id": "abc",
                "ticker": "KXTEST",
                "status": "resting",
                "action": "buy",
                "side": "yes",
                "type": "limit",
                "yes_price": 45,
                "count": 10,
                "remaining_count": 3
            }"#,
        )
        .unwrap();
        assert_eq!(order.filled_count(), 7);
        assert!(order.is_open());
        assert_eq!(order.price_decimal(), Some(dec!(0.45)));
    }

    #[test]
    fn test_book_payload_null_no_bids() {
        let response: KalshiBookResponse = serde_json::from_str(
            r#"{ "orderbook": { "yes_bids": [[40, 100]], "no_bids": null } }"#,
        )
        .unwrap();
        assert_eq!(response.orderbook.yes_levels(), vec![(40, 100)]);
        assert!(response.orderbook.no_levels().is_empty());
        assert!(!response.orderbook.is_provisional);
    }

    #[test]
    fn test_book_payload_short_field_names() {
        let response: KalshiBookResponse = serde_json::from_str(
            r#"{ "orderbook": { "yes": [[40, 100]], "no": [[55, 20]], "is_provisional": true } }"#,
        )
        .unwrap();
        assert_eq!(response.orderbook.no_levels(), vec![(55, 20)]);
        assert!(response.orderbook.is_provisional);
    }
}

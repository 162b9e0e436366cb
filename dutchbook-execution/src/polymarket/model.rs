//! Polymarket CLOB API request/response models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payload for POST /order.
#[derive(Debug, Clone, Serialize)]
pub struct PolymarketOrderPayload {
    pub order: SignedOrderPayload,
    /// `"FOK"`, `"FAK"`, `"GTC"`, `"GTD"`.
    #[serde(rename = "orderType")]
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neg_risk: Option<bool>,
}

/// The signed order sent to the CLOB.
#[derive(Debug, Clone, Serialize)]
pub struct SignedOrderPayload {
    pub token_id: String,
    pub maker: String,
    pub taker: String,
    pub maker_amount: String,
    pub taker_amount: String,
    /// 0 = buy, 1 = sell.
    pub side: u8,
    pub fee_rate_bps: String,
    pub salt: String,
    pub nonce: String,
    pub expiration: String,
    pub signature: String,
    pub signature_type: u8,
}

/// Response from POST /order.
#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketOrderResponse {
    #[serde(rename = "orderID")]
    pub order_id: Option<String>,
    pub success: Option<bool>,
    #[serde(rename = "errorMsg")]
    pub error_msg: Option<String>,
    /// `"matched"`, `"live"`, `"delayed"`, `"unmatched"`.
    pub status: Option<String>,
    /// Tokens actually received on a buy, as a decimal string.
    #[serde(rename = "takingAmount")]
    pub taking_amount: Option<String>,
    /// Collateral actually paid on a buy, as a decimal string.
    #[serde(rename = "makingAmount")]
    pub making_amount: Option<String>,
}

impl PolymarketOrderResponse {
    pub fn is_matched(&self) -> bool {
        self.success.unwrap_or(false) && self.status.as_deref() == Some("matched")
    }

    pub fn taking_decimal(&self) -> Option<Decimal> {
        self.taking_amount.as_deref()?.parse().ok()
    }

    pub fn making_decimal(&self) -> Option<Decimal> {
        self.making_amount.as_deref()?.parse().ok()
    }
}

/// Response from GET /balance-allowance.
#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketBalanceResponse {
    #[serde(default)]
    pub balance: String,
}

impl PolymarketBalanceResponse {
    /// Balance arrives in 6-decimal USDC raw units.
    pub fn balance_dollars(&self) -> Decimal {
        self.balance
            .parse::<Decimal>()
            .map(|raw| raw / Decimal::from(1_000_000))
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_response_matched() {
        let response: PolymarketOrderResponse = serde_json::from_str(
            r#"{
                "orderID": "0xabc",
                "success": true,
                "status": "matched",
                "takingAmount": "10",
                "makingAmount": "4.5"
            }"#,
        )
        .unwrap();
        assert!(response.is_matched());
        assert_eq!(response.taking_decimal(), Some(dec!(10)));
        assert_eq!(response.making_decimal(), Some(dec!(4.5)));
    }

    #[test]
    fn test_order_response_killed() {
        let response: PolymarketOrderResponse = serde_json::from_str(
            r#"{ "success": false, "errorMsg": "order couldn't be fully filled, FOK orders are fully filled or killed" }"#,
        )
        .unwrap();
        assert!(!response.is_matched());
    }

    #[test]
    fn test_balance_raw_units() {
        let response = PolymarketBalanceResponse { balance: "2500000".to_string() };
        assert_eq!(response.balance_dollars(), dec!(2.5));
    }
}

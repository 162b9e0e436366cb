//! Polymarket CLOB execution client.
//!
//! Orders are signed EIP-712 and submitted REST-side. FOK/FAK submissions
//! resolve their fill synchronously from the order response, so the
//! coordinator learns the outcome of a Polymarket leg in one round trip.

pub mod model;
pub mod sign;

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use dutchbook_instrument::Outcome;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::{debug, error};

use crate::adapter::{Fill, OrderTicket, PolymarketOrderAdapter};
use crate::error::VenueError;
use model::*;
use sign::{l2_headers, sign_order, OrderParams, PolymarketCredentials};

const CLOB_BASE: &str = "https://clob.polymarket.com";

/// Order signature lifetime.
const ORDER_TTL_SECS: i64 = 300;

/// Configuration for the Polymarket client.
#[derive(Debug, Clone)]
pub struct PolymarketConfig {
    pub credentials: PolymarketCredentials,
    /// Hex private key for EIP-712 order signing.
    pub private_key_hex: String,
    pub neg_risk: bool,
}

/// Polymarket CLOB REST client.
#[derive(Clone)]
pub struct PolymarketClient {
    client: Client,
    credentials: PolymarketCredentials,
    private_key_hex: String,
    maker: Address,
    neg_risk: bool,
    /// `(condition_id, outcome)` -> outcome token id.
    tokens: HashMap<(SmolStr, Outcome), SmolStr>,
    base_url: String,
}

impl std::fmt::Debug for PolymarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketClient")
            .field("maker", &self.maker)
            .field("neg_risk", &self.neg_risk)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl PolymarketClient {
    pub fn new(
        config: PolymarketConfig,
        tokens: HashMap<(SmolStr, Outcome), SmolStr>,
    ) -> Result<Self, VenueError> {
        let maker: Address = config
            .credentials
            .wallet_address
            .parse()
            .map_err(|e| VenueError::Signing(format!("invalid maker address: {e}")))?;

        Ok(Self {
            client: Client::new(),
            credentials: config.credentials,
            private_key_hex: config.private_key_hex,
            maker,
            neg_risk: config.neg_risk,
            tokens,
            base_url: CLOB_BASE.to_string(),
        })
    }

    fn token_for(&self, ticket: &OrderTicket) -> Result<&SmolStr, VenueError> {
        self.tokens
            .get(&(ticket.market_id.clone(), ticket.outcome))
            .ok_or_else(|| {
                VenueError::Rejected(format!(
                    "no token registered for {} {}",
                    ticket.market_id, ticket.outcome
                ))
            })
    }

    /// Submit an immediate order (`"FOK"` or `"FAK"`) and resolve its fill.
    async fn submit_immediate(&self, ticket: &OrderTicket, order_type: &str) -> Result<Fill, VenueError> {
        let token_id = self.token_for(ticket)?.clone();

        // Buy amounts in 6-decimal raw units:
        // maker provides USDC (price * qty), taker side receives tokens (qty).
        let qty = Decimal::from(ticket.qty);
        let maker_amount = (ticket.price * qty * Decimal::from(1_000_000)).round();
        let taker_amount = qty * Decimal::from(1_000_000);

        let maker_amount_u256 = U256::from(maker_amount.to_u128().unwrap_or(0));
        let taker_amount_u256 = U256::from(taker_amount.to_u128().unwrap_or(0));

        let token_id_u256 = parse_token_id(&token_id)?;
        let salt = U256::from(rand::random::<u64>());
        let expiration = chrono::Utc::now().timestamp() + ORDER_TTL_SECS;

        let params = OrderParams {
            salt,
            maker: self.maker,
            signer: self.maker,
            taker: Address::ZERO,
            token_id: token_id_u256,
            maker_amount: maker_amount_u256,
            taker_amount: taker_amount_u256,
            expiration: U256::from(expiration as u64),
            nonce: U256::ZERO,
            fee_rate_bps: U256::ZERO,
            side: 0,
            signature_type: 0,
            neg_risk: self.neg_risk,
        };

        let signature = sign_order(&self.private_key_hex, &params)
            .map_err(|e| VenueError::Signing(e.to_string()))?;

        let payload = PolymarketOrderPayload {
            order: SignedOrderPayload {
                token_id: token_id.to_string(),
                maker: format!("{:#x}", self.maker),
                taker: format!("{:#x}", Address::ZERO),
                maker_amount: maker_amount.to_string(),
                taker_amount: taker_amount.to_string(),
                side: 0,
                fee_rate_bps: "0".to_string(),
                salt: salt.to_string(),
                nonce: "0".to_string(),
                expiration: expiration.to_string(),
                signature,
                signature_type: 0,
            },
            order_type: order_type.to_string(),
            tick_size: Some("0.01".to_string()),
            neg_risk: self.neg_risk.then_some(true),
        };

        let response = self.submit_order(&payload).await?;
        Ok(self.resolve_fill(ticket, response))
    }

    /// Interpret an order response as a fill.
    ///
    /// A killed FOK is a zero fill, not an error. Matched orders report
    /// actual making/taking amounts; absent those, the ticket quantity and
    /// limit price are the contractual worst case.
    fn resolve_fill(&self, ticket: &OrderTicket, response: PolymarketOrderResponse) -> Fill {
        let order_id = SmolStr::new(response.order_id.as_deref().unwrap_or("unmatched"));

        if !response.is_matched() {
            debug!(
                market = %ticket.market_id,
                error = response.error_msg.as_deref().unwrap_or("killed"),
                "polymarket order not matched"
            );
            return Fill {
                order_id,
                filled_qty: 0,
                avg_price: Decimal::ZERO,
            };
        }

        let filled_qty = response
            .taking_decimal()
            .and_then(|taking| taking.floor().to_u32())
            .unwrap_or(ticket.qty);
        let avg_price = match (response.making_decimal(), response.taking_decimal()) {
            (Some(making), Some(taking)) if !taking.is_zero() => making / taking,
            _ => ticket.price,
        };

        Fill {
            order_id,
            filled_qty,
            avg_price,
        }
    }

    async fn submit_order(
        &self,
        payload: &PolymarketOrderPayload,
    ) -> Result<PolymarketOrderResponse, VenueError> {
        let body = serde_json::to_string(payload).map_err(|e| VenueError::Parse(e.to_string()))?;
        let path = "/order";

        let resp = self
            .request("POST", path, &body)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    pub async fn fetch_balance(&self) -> Result<PolymarketBalanceResponse, VenueError> {
        let sign_path = "/balance-allowance";
        let url_path = "/balance-allowance?asset_type=COLLATERAL&signature_type=0";

        let url = format!("{}{}", self.base_url, url_path);
        let mut builder = self.client.get(&url);
        for (name, value) in l2_headers(&self.credentials, "GET", sign_path, "") {
            builder = builder.header(name, value);
        }
        let resp = builder.send().await.map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    fn request(&self, method: &str, path: &str, body: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = match method {
            "POST" => self.client.post(&url),
            "DELETE" => self.client.delete(&url),
            _ => self.client.get(&url),
        };
        for (name, value) in l2_headers(&self.credentials, method, path, body) {
            builder = builder.header(name, value);
        }
        if method == "POST" {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }
        builder
    }

    async fn read<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, VenueError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%status, %body, "polymarket request failed");
            return Err(VenueError::from_status(status, body));
        }
        resp.json().await.map_err(|e| VenueError::Parse(e.to_string()))
    }
}

/// Token ids are decimal strings from the CLOB, hex from chain tooling.
fn parse_token_id(token_id: &str) -> Result<U256, VenueError> {
    let (digits, radix) = match token_id.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (token_id, 10),
    };
    U256::from_str_radix(digits, radix)
        .map_err(|e| VenueError::Rejected(format!("invalid token id {token_id}: {e}")))
}

impl PolymarketOrderAdapter for PolymarketClient {
    async fn place_fok(&self, ticket: &OrderTicket) -> Result<Fill, VenueError> {
        self.submit_immediate(ticket, "FOK").await
    }

    async fn place_ioc(&self, ticket: &OrderTicket) -> Result<Fill, VenueError> {
        self.submit_immediate(ticket, "FAK").await
    }

    async fn balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.fetch_balance().await?.balance_dollars())
    }
}

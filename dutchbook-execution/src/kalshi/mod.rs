//! Kalshi REST execution client.
//!
//! Prices are decimal dollars internally and converted to cents (1-99) at
//! the wire. Fill confirmation is polled via order status; Kalshi has no
//! user WebSocket for fills.

pub mod model;
pub mod sign;

use dutchbook_instrument::{decimal_to_cents, Outcome};
use reqwest::Client;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::{debug, error};

use crate::adapter::{KalshiOrderAdapter, OrderAck, OrderStatus, OrderTicket};
use crate::error::VenueError;
use model::*;
use sign::KalshiSigner;

const API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";
const DEMO_API_BASE: &str = "https://demo-api.kalshi.co/trade-api/v2";
/// Prefix included in the signed message but not the request URL path.
const SIGN_PREFIX: &str = "/trade-api/v2";

/// Kalshi REST client with RSA-signed authentication.
#[derive(Debug, Clone)]
pub struct KalshiClient {
    client: Client,
    signer: KalshiSigner,
    base_url: String,
}

impl KalshiClient {
    pub fn new(signer: KalshiSigner, demo: bool) -> Self {
        Self {
            client: Client::new(),
            signer,
            base_url: if demo { DEMO_API_BASE } else { API_BASE }.to_string(),
        }
    }

    pub fn signer(&self) -> &KalshiSigner {
        &self.signer
    }

    /// Build an authenticated request. The signature covers the full API
    /// path without query parameters.
    fn request(&self, method: &str, path: &str, sign_path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let full_sign_path = format!("{SIGN_PREFIX}{sign_path}");
        let mut builder = match method {
            "POST" => self.client.post(&url),
            "DELETE" => self.client.delete(&url),
            _ => self.client.get(&url),
        };
        for (name, value) in self.signer.headers(method, &full_sign_path) {
            builder = builder.header(name, value);
        }
        builder.header("Content-Type", "application/json")
    }

    async fn read<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, VenueError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(%status, %body, "kalshi request failed");
            return Err(VenueError::from_status(status, body));
        }
        resp.json().await.map_err(|e| VenueError::Parse(e.to_string()))
    }

    pub async fn create_order(
        &self,
        order: &KalshiCreateOrder,
    ) -> Result<KalshiOrderResponse, VenueError> {
        let path = "/portfolio/orders";
        debug!(ticker = %order.ticker, side = %order.side, count = order.count, "kalshi create order");
        let resp = self
            .request("POST", path, path)
            .json(order)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<KalshiCancelResponse, VenueError> {
        let path = format!("/portfolio/orders/{order_id}");
        let resp = self
            .request("DELETE", &path, &path)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<KalshiGetOrderResponse, VenueError> {
        let path = format!("/portfolio/orders/{order_id}");
        let resp = self
            .request("GET", &path, &path)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    pub async fn fetch_balance(&self) -> Result<KalshiBalanceResponse, VenueError> {
        let path = "/portfolio/balance";
        let resp = self
            .request("GET", path, path)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    pub async fn fetch_fills(&self, since: Option<&str>) -> Result<KalshiFillsResponse, VenueError> {
        let sign_path = "/portfolio/fills";
        let path = match since {
            Some(ts) => format!("/portfolio/fills?min_ts={ts}"),
            None => sign_path.to_string(),
        };
        let resp = self
            .request("GET", &path, sign_path)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }

    /// REST book snapshot, used by the normalizer on resync.
    pub async fn fetch_orderbook(&self, ticker: &str) -> Result<KalshiBookResponse, VenueError> {
        let path = format!("/markets/{ticker}/orderbook");
        let resp = self
            .request("GET", &path, &path)
            .send()
            .await
            .map_err(VenueError::from_request)?;
        Self::read(resp).await
    }
}

impl KalshiOrderAdapter for KalshiClient {
    async fn place_limit(&self, ticket: &OrderTicket) -> Result<OrderAck, VenueError> {
        let price_cents = decimal_to_cents(ticket.price);
        let (side, yes_price, no_price) = match ticket.outcome {
            Outcome::Yes => ("yes", Some(price_cents), None),
            Outcome::No => ("no", None, Some(price_cents)),
        };

        let order = KalshiCreateOrder {
            ticker: ticket.market_id.to_string(),
            client_order_id: ticket.client_id.to_string(),
            action: "buy".to_string(),
            side: side.to_string(),
            order_type: "limit".to_string(),
            count: ticket.qty,
            yes_price,
            no_price,
            expiration_ts: None,
        };

        let resp = self.create_order(&order).await?;
        Ok(OrderAck {
            order_id: SmolStr::new(&resp.order.order_id),
            filled_qty: resp.order.filled_count(),
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<u32, VenueError> {
        let resp = self.cancel_order(order_id).await?;
        Ok(resp.order.filled_count())
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, VenueError> {
        let resp = self.get_order(order_id).await?;
        Ok(OrderStatus {
            filled_qty: resp.order.filled_count(),
            avg_price: resp.order.price_decimal(),
            open: resp.order.is_open(),
        })
    }

    async fn balance(&self) -> Result<Decimal, VenueError> {
        let resp = self.fetch_balance().await?;
        Ok(Decimal::from(resp.balance) / Decimal::from(100))
    }
}

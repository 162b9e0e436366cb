//! Venue order adapter traits.
//!
//! The coordinator is generic over these seams; concrete clients live in
//! [`crate::kalshi`] and [`crate::polymarket`], and tests substitute mocks.
//! Futures are `Send` so arb tasks can be spawned onto the runtime.

use std::future::Future;

use dutchbook_instrument::Outcome;
use rust_decimal::Decimal;
use smol_str::SmolStr;

use crate::error::VenueError;

/// An order to buy one outcome of one market.
///
/// All engine orders are buys: a Yes+No pair is accumulated, never shorted.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OrderTicket {
    /// Kalshi ticker or Polymarket condition id.
    pub market_id: SmolStr,
    pub outcome: Outcome,
    /// Limit price in dollars.
    pub price: Decimal,
    /// Contracts.
    pub qty: u32,
    /// Caller-generated id for log correlation.
    pub client_id: SmolStr,
}

impl OrderTicket {
    pub fn new(market_id: impl Into<SmolStr>, outcome: Outcome, price: Decimal, qty: u32) -> Self {
        Self {
            market_id: market_id.into(),
            outcome,
            price,
            qty,
            client_id: SmolStr::new(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Notional value at the limit price.
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.qty)
    }
}

/// Acknowledgement of a resting or partially filled limit order.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OrderAck {
    pub order_id: SmolStr,
    /// Quantity already matched at acknowledgement time.
    pub filled_qty: u32,
}

/// Current state of a resting order.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OrderStatus {
    pub filled_qty: u32,
    /// Average fill price when known; the limit price is an upper bound.
    pub avg_price: Option<Decimal>,
    pub open: bool,
}

/// Resolved fill of an immediate order (FOK / FAK).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Fill {
    pub order_id: SmolStr,
    pub filled_qty: u32,
    pub avg_price: Decimal,
}

/// Kalshi order capability: limit orders with open/cancel and fill polling.
pub trait KalshiOrderAdapter: Send + Sync {
    /// Place an aggressive limit order at the ticket price.
    fn place_limit(
        &self,
        ticket: &OrderTicket,
    ) -> impl Future<Output = Result<OrderAck, VenueError>> + Send;

    /// Cancel a resting order; returns the quantity that had filled.
    fn cancel(&self, order_id: &str) -> impl Future<Output = Result<u32, VenueError>> + Send;

    /// Poll fill state.
    fn order_status(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<OrderStatus, VenueError>> + Send;

    /// Free balance in dollars.
    fn balance(&self) -> impl Future<Output = Result<Decimal, VenueError>> + Send;
}

/// Polymarket order capability: immediate orders resolving synchronously.
pub trait PolymarketOrderAdapter: Send + Sync {
    /// Fill-or-kill: fills the full quantity or reports a zero fill.
    fn place_fok(
        &self,
        ticket: &OrderTicket,
    ) -> impl Future<Output = Result<Fill, VenueError>> + Send;

    /// Fill-and-kill (IOC): fills what is available, cancels the rest.
    /// Used by the hedger to step through book levels.
    fn place_ioc(
        &self,
        ticket: &OrderTicket,
    ) -> impl Future<Output = Result<Fill, VenueError>> + Send;

    /// Free USDC balance in dollars.
    fn balance(&self) -> impl Future<Output = Result<Decimal, VenueError>> + Send;
}

//! Execution layer for the dutchbook arbitrage engine.
//!
//! Two venue adapters behind trait seams, plus the on-chain merge path:
//!
//! - [`kalshi`]: RSA-PSS signed REST client. Orders are aggressive limit
//!   orders; the coordinator enforces immediate-or-cancel by deadline.
//! - [`polymarket`]: EIP-712 signed CLOB client. Orders are fill-or-kill
//!   (or fill-and-kill for the hedger) and resolve their fill synchronously.
//! - [`chain`]: the Polygon chain seam and the CTF `mergePositions` client
//!   that turns a matched Yes+No pair back into collateral.
//!
//! The engine talks only to the [`adapter`] traits; concrete clients are
//! selected at startup.

pub mod adapter;
pub mod chain;
pub mod error;
pub mod gas;
pub mod kalshi;
pub mod polymarket;

pub use adapter::{Fill, KalshiOrderAdapter, OrderAck, OrderStatus, OrderTicket, PolymarketOrderAdapter};
pub use error::VenueError;
pub use gas::{FixedGasOracle, GasOracle, GasSnapshot};

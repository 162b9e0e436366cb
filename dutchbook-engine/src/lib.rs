//! Core engine for dutchbook: negative-spread arbitrage on binary
//! prediction markets.
//!
//! A Yes contract plus a No contract of one binary market pays exactly
//! $1.00 at settlement. Whenever the executable ask prices for both
//! outcomes, plus all taker fees and gas allowances, sum to strictly less
//! than $1.00, buying the pair locks in the difference. This crate detects
//! those windows and executes them:
//!
//! - [`scan`]: per-book-update negative-spread detection with fee/gas-aware
//!   thresholds and a greedy depth walk.
//! - [`risk`]: liveness, open-leg, whitelist, sizing and capital gates.
//! - [`exec`]: the two-leg coordinator; one task per arb owning its
//!   [`exec::LegState`] machine, CTF merge on intra-Polymarket pairs.
//! - [`hedge`]: chase/fade neutralization of orphaned legs within a bounded
//!   loss budget.
//! - [`ledger`]: append-only trade records whose replay reproduces
//!   positions and PnL.
//! - [`engine`]: the wiring loop, metrics, and drain/shutdown handling.
//!
//! Market data arrives from `dutchbook-data`; venue and chain access go
//! through the trait seams of `dutchbook-execution`.

pub mod config;
pub mod engine;
pub mod exec;
pub mod fees;
pub mod hedge;
pub mod ledger;
pub mod pairs;
pub mod risk;
pub mod scan;

pub use config::EngineConfig;
pub use engine::{Engine, EngineMetrics, MetricsSnapshot, RiskState};
pub use exec::{transition, ArbOutcome, ArbRunner, LegEvent, LegState};
pub use fees::FeeSchedule;
pub use hedge::{HedgeOutcome, HedgeStrategy, Hedger};
pub use ledger::{FinalState, JsonlTradeStore, LegFill, Position, PositionBook, TradeRecord, TradeStore};
pub use pairs::{CrossVenueWhitelist, MarketPair};
pub use risk::{Approval, OpenLegRegistry, RiskEngine, RiskRejection, VenueBalances, VenueHealth};
pub use scan::{ArbSignal, BookView, SpreadScanner};

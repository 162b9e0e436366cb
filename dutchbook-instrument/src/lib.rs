//! Shared vocabulary for the dutchbook arbitrage engine.
//!
//! Every other crate in the workspace speaks in terms of these types:
//!
//! - [`Venue`]: the two trading venues (Kalshi, Polymarket).
//! - [`Outcome`]: the Yes/No side of a binary market.
//! - [`MarketKey`]: unique identifier for one outcome ladder of one market
//!   on one venue.
//! - [`MarketProfile`]: static tags (crypto, duration class) that drive fee
//!   and threshold selection.
//!
//! Prices are `rust_decimal::Decimal` dollars everywhere inside the engine;
//! Kalshi wire prices are integer cents (1-99). The conversion helpers here
//! are the only place that translation happens.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A trading venue.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    /// Centralized regulated exchange with a CLOB and RSA-signed APIs.
    Kalshi,
    /// Hybrid venue: off-chain CLOB matcher, on-chain CTF settlement.
    Polymarket,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Kalshi => write!(f, "kalshi"),
            Venue::Polymarket => write!(f, "polymarket"),
        }
    }
}

/// Outcome side of a binary market.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The opposing outcome.
    pub fn inverse(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "yes"),
            Outcome::No => write!(f, "no"),
        }
    }
}

/// Unique identifier for one outcome ladder of one market on one venue.
///
/// `market_id` is the Kalshi ticker or the Polymarket condition id.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Deserialize, Serialize)]
pub struct MarketKey {
    pub venue: Venue,
    pub market_id: SmolStr,
    pub outcome: Outcome,
}

impl MarketKey {
    pub fn new(venue: Venue, market_id: impl Into<SmolStr>, outcome: Outcome) -> Self {
        Self {
            venue,
            market_id: market_id.into(),
            outcome,
        }
    }

    pub fn kalshi_yes(ticker: impl Into<SmolStr>) -> Self {
        Self::new(Venue::Kalshi, ticker, Outcome::Yes)
    }

    pub fn kalshi_no(ticker: impl Into<SmolStr>) -> Self {
        Self::new(Venue::Kalshi, ticker, Outcome::No)
    }

    pub fn polymarket_yes(condition_id: impl Into<SmolStr>) -> Self {
        Self::new(Venue::Polymarket, condition_id, Outcome::Yes)
    }

    pub fn polymarket_no(condition_id: impl Into<SmolStr>) -> Self {
        Self::new(Venue::Polymarket, condition_id, Outcome::No)
    }

    /// The `(venue, market_id)` pair, ignoring outcome. Used by the risk
    /// engine's one-arb-per-market rule.
    pub fn market(&self) -> (Venue, SmolStr) {
        (self.venue, self.market_id.clone())
    }
}

impl std::fmt::Display for MarketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.venue, self.market_id, self.outcome)
    }
}

/// Duration class of a market, as tagged by the venue.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationClass {
    Min15,
    Hour1,
    Daily,
    #[default]
    LongDated,
}

/// Static market tags that drive fee and threshold selection.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct MarketProfile {
    /// Market resolves on a crypto price reference.
    pub crypto: bool,
    pub duration: DurationClass,
}

impl MarketProfile {
    pub fn new(crypto: bool, duration: DurationClass) -> Self {
        Self { crypto, duration }
    }

    /// Crypto markets with 15m/1h duration carry Polymarket's dynamic taker
    /// fee and require the elevated spread threshold.
    pub fn is_short_duration_crypto(&self) -> bool {
        self.crypto && matches!(self.duration, DurationClass::Min15 | DurationClass::Hour1)
    }
}

/// Convert a Kalshi cent price (1-99) to decimal dollars.
pub fn cents_to_decimal(cents: u32) -> Decimal {
    Decimal::from(cents) / Decimal::from(100)
}

/// Convert a decimal dollar price to Kalshi cents, clamped to the valid
/// 1-99 tick range.
pub fn decimal_to_cents(price: Decimal) -> u32 {
    let cents = (price * Decimal::from(100)).round().to_u32().unwrap_or(50);
    cents.clamp(1, 99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_inverse() {
        assert_eq!(Outcome::Yes.inverse(), Outcome::No);
        assert_eq!(Outcome::No.inverse(), Outcome::Yes);
    }

    #[test]
    fn test_market_key_display() {
        let key = MarketKey::kalshi_yes("KXBTC-25JAN31-T100000");
        assert_eq!(key.to_string(), "kalshi|KXBTC-25JAN31-T100000|yes");

        let key = MarketKey::polymarket_no("0xcondition");
        assert_eq!(key.to_string(), "polymarket|0xcondition|no");
    }

    #[test]
    fn test_market_ignores_outcome() {
        let yes = MarketKey::kalshi_yes("KXTEST");
        let no = MarketKey::kalshi_no("KXTEST");
        assert_eq!(yes.market(), no.market());
    }

    #[test]
    fn test_short_duration_crypto() {
        assert!(MarketProfile::new(true, DurationClass::Min15).is_short_duration_crypto());
        assert!(MarketProfile::new(true, DurationClass::Hour1).is_short_duration_crypto());
        assert!(!MarketProfile::new(true, DurationClass::Daily).is_short_duration_crypto());
        assert!(!MarketProfile::new(false, DurationClass::Min15).is_short_duration_crypto());
        assert!(!MarketProfile::default().is_short_duration_crypto());
    }

    #[test]
    fn test_cents_round_trip() {
        assert_eq!(cents_to_decimal(45), dec!(0.45));
        assert_eq!(decimal_to_cents(dec!(0.45)), 45);
        assert_eq!(decimal_to_cents(dec!(0.004)), 1); // clamped to tick floor
        assert_eq!(decimal_to_cents(dec!(1.50)), 99); // clamped to tick ceiling
    }
}

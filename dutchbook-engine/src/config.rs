//! Engine configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashSet;

/// Tunable parameters for scanning, risk and execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Baseline minimum viable spread, in cents.
    pub min_spread_cents: u32,
    /// Elevated threshold for crypto markets with 15m/1h duration, in cents.
    pub crypto_short_duration_min_spread_cents: u32,
    /// Hard cap on per-trade notional, in dollars.
    pub max_position_size_usd: Decimal,
    /// Per-trade fraction of a venue's free balance.
    pub balance_fraction: Decimal,
    /// Cap on contracts per signal regardless of displayed liquidity.
    pub capacity_cap_contracts: u32,
    /// Reject leg-1 partials below this quantity instead of hedging.
    pub min_viable_qty: u32,
    /// When false, signals are recorded but no orders are submitted.
    pub enable_live_trading: bool,
    /// Permitted `(kalshi_ticker, polymarket_condition_id)` pairs for
    /// cross-venue arbitrage. External policy; empty disables cross-venue.
    pub cross_platform_whitelist: HashSet<(SmolStr, SmolStr)>,
    /// Size multiplier applied to cross-venue trades.
    pub cross_venue_size_factor: Decimal,
    /// Polymarket dynamic fee ceiling for short-duration crypto markets.
    pub poly_dynamic_fee_ceiling: Decimal,
    /// On-chain merge retry budget.
    pub merge_max_retries: u32,
    /// Fade patience before the hedger escalates to chasing, in ms.
    pub hedge_timeout_ms: u64,
    /// Maximum acceptable hedge loss per contract, in dollars.
    pub max_hedge_loss_per_contract: Decimal,
    /// Leg timeout for intra-Polymarket FOK legs, in ms.
    pub poly_leg_timeout_ms: u64,
    /// Leg timeout for Kalshi limit legs, in ms.
    pub kalshi_leg_timeout_ms: u64,
    /// Leg-1 timeout for cross-venue arbs, in ms.
    pub cross_leg_timeout_ms: u64,
    /// Global deadline for draining in-flight legs at shutdown, in ms.
    pub shutdown_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_spread_cents: 2,
            crypto_short_duration_min_spread_cents: 4,
            max_position_size_usd: Decimal::from(1000),
            balance_fraction: Decimal::new(2, 2),
            capacity_cap_contracts: 1000,
            min_viable_qty: 1,
            enable_live_trading: false,
            cross_platform_whitelist: HashSet::new(),
            cross_venue_size_factor: Decimal::new(5, 1),
            poly_dynamic_fee_ceiling: Decimal::new(3, 2),
            merge_max_retries: 3,
            hedge_timeout_ms: 3000,
            max_hedge_loss_per_contract: Decimal::new(5, 2),
            poly_leg_timeout_ms: 500,
            kalshi_leg_timeout_ms: 2000,
            cross_leg_timeout_ms: 5000,
            shutdown_deadline_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// The spread threshold in dollars for a market profile.
    pub fn threshold(&self, profile: &dutchbook_instrument::MarketProfile) -> Decimal {
        let cents = if profile.is_short_duration_crypto() {
            self.crypto_short_duration_min_spread_cents
        } else {
            self.min_spread_cents
        };
        Decimal::from(cents) / Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dutchbook_instrument::{DurationClass, MarketProfile};
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_match_operating_values() {
        let config = EngineConfig::default();
        assert_eq!(config.min_spread_cents, 2);
        assert_eq!(config.crypto_short_duration_min_spread_cents, 4);
        assert_eq!(config.max_position_size_usd, dec!(1000));
        assert_eq!(config.balance_fraction, dec!(0.02));
        assert!(!config.enable_live_trading);
        assert!(config.cross_platform_whitelist.is_empty());
    }

    #[test]
    fn test_threshold_selection() {
        let config = EngineConfig::default();
        assert_eq!(config.threshold(&MarketProfile::default()), dec!(0.02));
        assert_eq!(
            config.threshold(&MarketProfile::new(true, DurationClass::Min15)),
            dec!(0.04)
        );
        assert_eq!(
            config.threshold(&MarketProfile::new(true, DurationClass::Daily)),
            dec!(0.02)
        );
    }
}

//! Risk engine and position sizer.
//!
//! Gates run in a fixed order: venue liveness, open-leg, whitelist
//! (cross-venue only), sizing, capital. Every rejection is a structured,
//! non-fatal reason; the engine surfaces them as metrics.
//!
//! The free-balance counters are the only mutable risk state. They are
//! mutated exclusively through [`VenueBalances::reserve`] /
//! [`VenueBalances::release`], and the caller holds them behind one lock so
//! each mutation is atomic with respect to await points.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use dutchbook_instrument::Venue;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::fees::FeeSchedule;
use crate::pairs::CrossVenueWhitelist;
use crate::scan::ArbSignal;

/// Structured rejection reasons. Not errors to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskRejection {
    #[error("venue {0} is not live")]
    VenueDown(Venue),
    #[error("open leg in flight for {venue} {market_id}")]
    OpenLeg { venue: Venue, market_id: SmolStr },
    #[error("cross-venue pair not whitelisted")]
    NotWhitelisted,
    #[error("insufficient {venue} balance: need {needed}, free {free}")]
    InsufficientCapital {
        venue: Venue,
        needed: Decimal,
        free: Decimal,
    },
    #[error("sized to zero contracts")]
    ZeroQty,
}

/// Venue liveness flags, flipped by the feed/adapter tasks.
#[derive(Debug, Default)]
pub struct VenueHealth {
    kalshi: AtomicBool,
    polymarket: AtomicBool,
}

impl VenueHealth {
    pub fn set_live(&self, venue: Venue, live: bool) {
        match venue {
            Venue::Kalshi => self.kalshi.store(live, Ordering::Relaxed),
            Venue::Polymarket => self.polymarket.store(live, Ordering::Relaxed),
        }
    }

    pub fn is_live(&self, venue: Venue) -> bool {
        match venue {
            Venue::Kalshi => self.kalshi.load(Ordering::Relaxed),
            Venue::Polymarket => self.polymarket.load(Ordering::Relaxed),
        }
    }
}

/// Per-venue free-balance counters.
#[derive(Debug, Clone, Default)]
pub struct VenueBalances {
    free: HashMap<Venue, Decimal>,
}

impl VenueBalances {
    pub fn set(&mut self, venue: Venue, free: Decimal) {
        self.free.insert(venue, free);
    }

    pub fn free(&self, venue: Venue) -> Decimal {
        self.free.get(&venue).copied().unwrap_or(Decimal::ZERO)
    }

    /// Decrement the free counter; fails without mutating if insufficient.
    pub fn reserve(&mut self, venue: Venue, amount: Decimal) -> Result<(), RiskRejection> {
        let free = self.free(venue);
        if free < amount {
            return Err(RiskRejection::InsufficientCapital {
                venue,
                needed: amount,
                free,
            });
        }
        self.free.insert(venue, free - amount);
        Ok(())
    }

    /// Credit back a reservation on abort or merge.
    pub fn release(&mut self, venue: Venue, amount: Decimal) {
        let free = self.free(venue);
        self.free.insert(venue, free + amount);
    }
}

/// In-flight arb registry: at most one per `(venue, market_id)`.
#[derive(Debug, Default)]
pub struct OpenLegRegistry {
    active: HashSet<(Venue, SmolStr)>,
}

impl OpenLegRegistry {
    pub fn is_busy(&self, market: &(Venue, SmolStr)) -> bool {
        self.active.contains(market)
    }

    pub fn claim(&mut self, markets: &[(Venue, SmolStr)]) {
        for market in markets {
            self.active.insert(market.clone());
        }
    }

    pub fn release(&mut self, markets: &[(Venue, SmolStr)]) {
        for market in markets {
            self.active.remove(market);
        }
    }
}

/// An approved, sized, capital-reserved trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub signal: ArbSignal,
    pub qty: u32,
    /// Capital reserved per venue; released on terminal state.
    pub reserved: Vec<(Venue, Decimal)>,
    /// Which constraint bound the size.
    pub bound_by: SizeConstraint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeConstraint {
    SignalDepth,
    PositionCap,
    BalanceFraction,
}

/// The risk engine. Pure over the signal and the state snapshot it is
/// handed; all mutation goes through the passed-in counters and registry.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: EngineConfig,
    fees: FeeSchedule,
    whitelist: CrossVenueWhitelist,
}

impl RiskEngine {
    pub fn new(config: EngineConfig, fees: FeeSchedule, whitelist: CrossVenueWhitelist) -> Self {
        Self {
            config,
            fees,
            whitelist,
        }
    }

    /// Run the gate chain. On success the registry holds the markets and
    /// the balances hold the reservations.
    pub fn approve(
        &self,
        signal: &ArbSignal,
        health: &VenueHealth,
        balances: &mut VenueBalances,
        legs: &mut OpenLegRegistry,
    ) -> Result<Approval, RiskRejection> {
        let pair = &signal.pair;

        // 1. Venue liveness.
        for (venue, _) in pair.markets() {
            if !health.is_live(venue) {
                return Err(RiskRejection::VenueDown(venue));
            }
        }

        // 2. Open legs: one in-flight arb per (venue, market).
        for market in pair.markets() {
            if legs.is_busy(&market) {
                return Err(RiskRejection::OpenLeg {
                    venue: market.0,
                    market_id: market.1,
                });
            }
        }

        // 3. Whitelist (cross-venue only).
        if !self.whitelist.permits(pair) {
            return Err(RiskRejection::NotWhitelisted);
        }

        // 4. Size.
        let (qty, bound_by) = self.size(signal, balances);
        if qty == 0 {
            return Err(RiskRejection::ZeroQty);
        }

        // 5. Capital: reserve per venue, all-or-nothing.
        let reserved = self.reservations(signal, qty);
        let mut committed: Vec<(Venue, Decimal)> = Vec::new();
        for &(venue, amount) in &reserved {
            if let Err(rejection) = balances.reserve(venue, amount) {
                for &(v, a) in &committed {
                    balances.release(v, a);
                }
                return Err(rejection);
            }
            committed.push((venue, amount));
        }

        legs.claim(&pair.markets());

        debug!(pair = %pair, qty, ?bound_by, "risk approved");
        Ok(Approval {
            signal: signal.clone(),
            qty,
            reserved,
            bound_by,
        })
    }

    /// `qty = min(signal depth, per-trade cap, balance fraction)`, floored
    /// to whole contracts. Cross-venue trades are additionally scaled down.
    fn size(&self, signal: &ArbSignal, balances: &VenueBalances) -> (u32, SizeConstraint) {
        let pair_cost = signal.yes_limit + signal.no_limit;
        if pair_cost <= Decimal::ZERO {
            return (0, SizeConstraint::SignalDepth);
        }

        let cap_qty = floor_qty(self.config.max_position_size_usd / pair_cost);

        // The binding balance is the smallest venue allowance among the
        // venues this trade touches.
        let balance_budget = signal
            .pair
            .markets()
            .iter()
            .map(|&(venue, _)| balances.free(venue) * self.config.balance_fraction)
            .min()
            .unwrap_or(Decimal::ZERO);
        let balance_qty = floor_qty(balance_budget / pair_cost);

        let mut qty = signal.max_qty.min(cap_qty).min(balance_qty);
        let bound_by = if qty == signal.max_qty {
            SizeConstraint::SignalDepth
        } else if qty == cap_qty {
            SizeConstraint::PositionCap
        } else {
            SizeConstraint::BalanceFraction
        };

        if signal.pair.is_cross_venue() {
            qty = floor_qty(Decimal::from(qty) * self.config.cross_venue_size_factor);
        }

        (qty, bound_by)
    }

    /// Per-venue reservation: leg notional plus that leg's fees, plus the
    /// gas allowance on the Polymarket side.
    fn reservations(&self, signal: &ArbSignal, qty: u32) -> Vec<(Venue, Decimal)> {
        let pair = &signal.pair;
        let qty_dec = Decimal::from(qty);
        let mut per_venue: HashMap<Venue, Decimal> = HashMap::new();

        for (key, price) in [(&pair.yes, signal.yes_limit), (&pair.no, signal.no_limit)] {
            let fee = match key.venue {
                Venue::Kalshi => self.fees.kalshi_taker_fee(price, qty),
                Venue::Polymarket => {
                    self.fees.polymarket_taker_fee(price, qty, &pair.profile)
                }
            };
            let mut cost = price * qty_dec + fee;
            if key.venue == Venue::Polymarket {
                cost += signal.gas_per_contract * qty_dec;
            }
            *per_venue.entry(key.venue).or_insert(Decimal::ZERO) += cost;
        }

        per_venue.into_iter().collect()
    }
}

fn floor_qty(value: Decimal) -> u32 {
    value.floor().to_u32().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::MarketPair;
    use chrono::Utc;
    use dutchbook_instrument::MarketProfile;
    use rust_decimal_macros::dec;

    fn signal(pair: MarketPair, yes: Decimal, no: Decimal, max_qty: u32) -> ArbSignal {
        ArbSignal {
            pair,
            yes_ask: yes,
            no_ask: no,
            yes_limit: yes,
            no_limit: no,
            max_qty,
            fees_per_contract: Decimal::ZERO,
            gas_per_contract: Decimal::ZERO,
            net_edge: Decimal::ONE - yes - no,
            ts: Utc::now(),
        }
    }

    fn poly_signal(max_qty: u32) -> ArbSignal {
        signal(
            MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default()),
            dec!(0.45),
            dec!(0.53),
            max_qty,
        )
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(
            EngineConfig::default(),
            FeeSchedule::default(),
            CrossVenueWhitelist::default(),
        )
    }

    fn live_health() -> VenueHealth {
        let health = VenueHealth::default();
        health.set_live(Venue::Kalshi, true);
        health.set_live(Venue::Polymarket, true);
        health
    }

    fn funded() -> VenueBalances {
        let mut balances = VenueBalances::default();
        balances.set(Venue::Kalshi, dec!(10000));
        balances.set(Venue::Polymarket, dec!(10000));
        balances
    }

    #[test]
    fn test_approval_reserves_capital_and_claims_markets() {
        let engine = engine();
        let health = live_health();
        let mut balances = funded();
        let mut legs = OpenLegRegistry::default();

        let approval = engine
            .approve(&poly_signal(100), &health, &mut balances, &mut legs)
            .unwrap();

        // balance_fraction 0.02 of 10k = $200 budget / 0.98 = 204 contracts;
        // signal depth 100 binds.
        assert_eq!(approval.qty, 100);
        assert_eq!(approval.bound_by, SizeConstraint::SignalDepth);

        // Reservation: 100 * 0.98 = $98 off the Polymarket counter.
        assert_eq!(balances.free(Venue::Polymarket), dec!(9902));
        assert!(legs.is_busy(&(Venue::Polymarket, SmolStr::new("0xcond"))));
    }

    #[test]
    fn test_venue_down_rejected() {
        let engine = engine();
        let health = VenueHealth::default();
        let mut balances = funded();
        let mut legs = OpenLegRegistry::default();

        let err = engine
            .approve(&poly_signal(100), &health, &mut balances, &mut legs)
            .unwrap_err();
        assert_eq!(err, RiskRejection::VenueDown(Venue::Polymarket));
    }

    #[test]
    fn test_open_leg_rejected() {
        let engine = engine();
        let health = live_health();
        let mut balances = funded();
        let mut legs = OpenLegRegistry::default();
        legs.claim(&[(Venue::Polymarket, SmolStr::new("0xcond"))]);

        let err = engine
            .approve(&poly_signal(100), &health, &mut balances, &mut legs)
            .unwrap_err();
        assert!(matches!(err, RiskRejection::OpenLeg { .. }));

        // Nothing reserved on rejection.
        assert_eq!(balances.free(Venue::Polymarket), dec!(10000));
    }

    #[test]
    fn test_cross_venue_requires_whitelist() {
        let engine = engine();
        let health = live_health();
        let mut balances = funded();
        let mut legs = OpenLegRegistry::default();

        let cross = signal(
            MarketPair::cross("KXTEST", "0xcond", MarketProfile::default()),
            dec!(0.44),
            dec!(0.49),
            100,
        );
        let err = engine
            .approve(&cross, &health, &mut balances, &mut legs)
            .unwrap_err();
        assert_eq!(err, RiskRejection::NotWhitelisted);
    }

    #[test]
    fn test_whitelisted_cross_venue_sized_down() {
        let mut listed = HashSet::new();
        listed.insert((SmolStr::new("KXTEST"), SmolStr::new("0xcond")));
        let engine = RiskEngine::new(
            EngineConfig::default(),
            FeeSchedule::default(),
            CrossVenueWhitelist::new(listed),
        );
        let health = live_health();
        let mut balances = funded();
        let mut legs = OpenLegRegistry::default();

        let cross = signal(
            MarketPair::cross("KXTEST", "0xcond", MarketProfile::default()),
            dec!(0.44),
            dec!(0.49),
            100,
        );
        let approval = engine
            .approve(&cross, &health, &mut balances, &mut legs)
            .unwrap();
        // Depth 100 scaled by the 0.5 cross-venue factor.
        assert_eq!(approval.qty, 50);

        // Both venues claimed and both reserved.
        assert!(legs.is_busy(&(Venue::Kalshi, SmolStr::new("KXTEST"))));
        assert!(legs.is_busy(&(Venue::Polymarket, SmolStr::new("0xcond"))));
        assert!(balances.free(Venue::Kalshi) < dec!(10000));
        assert!(balances.free(Venue::Polymarket) < dec!(10000));
    }

    #[test]
    fn test_position_cap_binds_large_signals() {
        let engine = engine();
        let health = live_health();
        let mut balances = VenueBalances::default();
        balances.set(Venue::Polymarket, dec!(1_000_000));
        let mut legs = OpenLegRegistry::default();

        let approval = engine
            .approve(&poly_signal(10_000), &health, &mut balances, &mut legs)
            .unwrap();
        // Cap $1000 / $0.98 per pair = 1020 contracts.
        assert_eq!(approval.qty, 1020);
        assert_eq!(approval.bound_by, SizeConstraint::PositionCap);
    }

    #[test]
    fn test_balance_fraction_binds_small_accounts() {
        let engine = engine();
        let health = live_health();
        let mut balances = VenueBalances::default();
        balances.set(Venue::Polymarket, dec!(100));
        let mut legs = OpenLegRegistry::default();

        let approval = engine
            .approve(&poly_signal(10_000), &health, &mut balances, &mut legs)
            .unwrap();
        // 2% of $100 = $2 budget / $0.98 = 2 contracts.
        assert_eq!(approval.qty, 2);
        assert_eq!(approval.bound_by, SizeConstraint::BalanceFraction);
    }

    #[test]
    fn test_zero_qty_rejected() {
        let engine = engine();
        let health = live_health();
        let mut balances = VenueBalances::default();
        balances.set(Venue::Polymarket, dec!(10));
        let mut legs = OpenLegRegistry::default();

        // 2% of $10 = $0.20 < one pair at $0.98.
        let err = engine
            .approve(&poly_signal(100), &health, &mut balances, &mut legs)
            .unwrap_err();
        assert_eq!(err, RiskRejection::ZeroQty);
    }

    #[test]
    fn test_reserve_release_round_trip() {
        let mut balances = funded();
        balances.reserve(Venue::Kalshi, dec!(500)).unwrap();
        assert_eq!(balances.free(Venue::Kalshi), dec!(9500));
        balances.release(Venue::Kalshi, dec!(500));
        assert_eq!(balances.free(Venue::Kalshi), dec!(10000));

        let err = balances.reserve(Venue::Kalshi, dec!(20000)).unwrap_err();
        assert!(matches!(err, RiskRejection::InsufficientCapital { .. }));
        assert_eq!(balances.free(Venue::Kalshi), dec!(10000));
    }
}

//! Negative-spread scanner.
//!
//! For every published book update, re-evaluate the pairings that touch the
//! updated market: a Yes+No pair pays $1.00 at settlement, so any executable
//! ask pair whose all-in cost (prices + taker fees + gas allowance) leaves at
//! least the threshold edge is an arbitrage signal.
//!
//! Evaluation is synchronous and never suspends, so one signal always sees a
//! consistent book snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dutchbook_data::books::{Level, MarketBook};
use dutchbook_execution::gas::GasSnapshot;
use dutchbook_instrument::Venue;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tracing::debug;

use crate::config::EngineConfig;
use crate::fees::FeeSchedule;
use crate::pairs::MarketPair;

/// Read-only view of the latest published book per market.
pub type BookView = HashMap<(Venue, SmolStr), Arc<MarketBook>>;

/// A detected arbitrage opportunity.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArbSignal {
    pub pair: MarketPair,
    /// Top-of-book asks at detection time.
    pub yes_ask: Decimal,
    pub no_ask: Decimal,
    /// Execution limit prices: the deepest ladder level the depth walk found
    /// still profitable. Orders priced here stay marketable across the
    /// walked depth without ever crossing into a loss-making level.
    pub yes_limit: Decimal,
    pub no_limit: Decimal,
    /// Contracts executable inside the profitable depth.
    pub max_qty: u32,
    /// Worst-case taker fees per contract, both legs, at top-of-book.
    pub fees_per_contract: Decimal,
    /// Gas allowance per contract (Polymarket legs only).
    pub gas_per_contract: Decimal,
    /// `1.00 - yes_ask - no_ask - fees - gas` at top-of-book.
    pub net_edge: Decimal,
    pub ts: DateTime<Utc>,
}

impl ArbSignal {
    /// All-in cost per contract at the execution limit prices.
    pub fn limit_cost_per_contract(&self) -> Decimal {
        self.yes_limit + self.no_limit + self.fees_per_contract + self.gas_per_contract
    }
}

/// The scanner: holds the monitored pairings and an index by market.
pub struct SpreadScanner {
    config: EngineConfig,
    fees: FeeSchedule,
    pairs: Vec<MarketPair>,
    by_market: HashMap<(Venue, SmolStr), Vec<usize>>,
}

impl SpreadScanner {
    pub fn new(config: EngineConfig, fees: FeeSchedule, pairs: Vec<MarketPair>) -> Self {
        let mut by_market: HashMap<(Venue, SmolStr), Vec<usize>> = HashMap::new();
        for (index, pair) in pairs.iter().enumerate() {
            for market in pair.markets() {
                by_market.entry(market).or_default().push(index);
            }
        }
        Self {
            config,
            fees,
            pairs,
            by_market,
        }
    }

    pub fn pairs(&self) -> &[MarketPair] {
        &self.pairs
    }

    /// Evaluate every pairing touching `updated`.
    pub fn on_book_update(
        &self,
        books: &BookView,
        updated: &(Venue, SmolStr),
        gas: &GasSnapshot,
    ) -> Vec<ArbSignal> {
        let Some(indices) = self.by_market.get(updated) else {
            return Vec::new();
        };
        indices
            .iter()
            .filter_map(|&index| self.evaluate_pair(&self.pairs[index], books, gas))
            .collect()
    }

    /// Evaluate one pairing against the current books.
    pub fn evaluate_pair(
        &self,
        pair: &MarketPair,
        books: &BookView,
        gas: &GasSnapshot,
    ) -> Option<ArbSignal> {
        if pair.is_expired() {
            return None;
        }

        let yes_book = books.get(&pair.yes.market())?;
        let no_book = books.get(&pair.no.market())?;

        let yes_levels = yes_book.yes_asks.levels();
        let no_levels = no_book.no_asks.levels();

        // An empty ask side is the no-liquidity sentinel: skip the market.
        let yes_top = yes_levels.first()?;
        let no_top = no_levels.first()?;

        // Gas applies when a Polymarket leg is involved. The full
        // per-transaction estimate is charged per contract, the qty = 1
        // worst case.
        let pays_gas =
            pair.yes.venue == Venue::Polymarket || pair.no.venue == Venue::Polymarket;
        let gas_per_contract = if pays_gas { gas.per_tx_usdc } else { Decimal::ZERO };

        let threshold = self.pair_threshold(pair);
        let fees_per_contract = self.leg_fees(pair, yes_top.price, no_top.price);
        let net_edge =
            Decimal::ONE - yes_top.price - no_top.price - fees_per_contract - gas_per_contract;

        if net_edge < threshold {
            return None;
        }

        let (max_qty, yes_limit, no_limit) =
            self.walk_depth(pair, yes_levels, no_levels, threshold, gas_per_contract);
        if max_qty == 0 {
            return None;
        }

        debug!(
            pair = %pair,
            %net_edge,
            max_qty,
            "negative spread detected"
        );

        Some(ArbSignal {
            pair: pair.clone(),
            yes_ask: yes_top.price,
            no_ask: no_top.price,
            yes_limit,
            no_limit,
            max_qty,
            fees_per_contract,
            gas_per_contract,
            net_edge,
            ts: Utc::now(),
        })
    }

    /// Cross-venue pairings use the elevated threshold tier; intra-market
    /// pairings use the profile threshold.
    fn pair_threshold(&self, pair: &MarketPair) -> Decimal {
        let base = self.config.threshold(&pair.profile);
        if pair.is_cross_venue() {
            let elevated = Decimal::from(self.config.crypto_short_duration_min_spread_cents)
                / Decimal::from(100);
            base.max(elevated)
        } else {
            base
        }
    }

    fn leg_fees(&self, pair: &MarketPair, yes_price: Decimal, no_price: Decimal) -> Decimal {
        self.fees.fee_per_contract(pair.yes.venue, yes_price, &pair.profile)
            + self.fees.fee_per_contract(pair.no.venue, no_price, &pair.profile)
    }

    /// Greedy walk through matching ladder depth.
    ///
    /// Takes quantity level-pair by level-pair while the marginal edge at
    /// the current prices still clears the threshold; never crosses into a
    /// level pair that would not.
    fn walk_depth(
        &self,
        pair: &MarketPair,
        yes_levels: &[Level],
        no_levels: &[Level],
        threshold: Decimal,
        gas_per_contract: Decimal,
    ) -> (u32, Decimal, Decimal) {
        let cap = self.config.capacity_cap_contracts;
        let mut qty = 0u32;
        let mut yes_limit = Decimal::ZERO;
        let mut no_limit = Decimal::ZERO;

        let mut i = 0;
        let mut j = 0;
        let mut remaining_yes = level_qty(yes_levels.first());
        let mut remaining_no = level_qty(no_levels.first());

        while i < yes_levels.len() && j < no_levels.len() && qty < cap {
            let yes_price = yes_levels[i].price;
            let no_price = no_levels[j].price;
            let marginal_edge = Decimal::ONE
                - yes_price
                - no_price
                - self.leg_fees(pair, yes_price, no_price)
                - gas_per_contract;
            if marginal_edge < threshold {
                break;
            }

            let take = remaining_yes.min(remaining_no).min(cap - qty);
            if take == 0 {
                break;
            }
            qty += take;
            yes_limit = yes_price;
            no_limit = no_price;

            remaining_yes -= take;
            remaining_no -= take;
            if remaining_yes == 0 {
                i += 1;
                remaining_yes = level_qty(yes_levels.get(i));
            }
            if remaining_no == 0 {
                j += 1;
                remaining_no = level_qty(no_levels.get(j));
            }
        }

        (qty, yes_limit, no_limit)
    }
}

fn level_qty(level: Option<&Level>) -> u32 {
    level
        .and_then(|l| l.qty.floor().to_u32())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dutchbook_data::books::Ladder;
    use dutchbook_execution::gas::GasOracle;
    use dutchbook_execution::FixedGasOracle;
    use dutchbook_instrument::{DurationClass, MarketProfile};
    use rust_decimal_macros::dec;

    fn poly_book(
        market_id: &str,
        yes_asks: Vec<(Decimal, u32)>,
        no_asks: Vec<(Decimal, u32)>,
    ) -> Arc<MarketBook> {
        Arc::new(MarketBook {
            venue: Venue::Polymarket,
            market_id: SmolStr::new(market_id),
            seq: 1,
            last_update: Utc::now(),
            provisional: false,
            yes_bids: Ladder::bids(vec![]),
            no_bids: Ladder::bids(vec![]),
            yes_asks: Ladder::asks(
                yes_asks.into_iter().map(|(p, q)| Level::new(p, Decimal::from(q))).collect(),
            ),
            no_asks: Ladder::asks(
                no_asks.into_iter().map(|(p, q)| Level::new(p, Decimal::from(q))).collect(),
            ),
        })
    }

    fn kalshi_book(
        ticker: &str,
        yes_asks: Vec<(Decimal, u32)>,
        no_asks: Vec<(Decimal, u32)>,
    ) -> Arc<MarketBook> {
        let mut book = (*poly_book(ticker, yes_asks, no_asks)).clone();
        book.venue = Venue::Kalshi;
        Arc::new(book)
    }

    fn scanner(pairs: Vec<MarketPair>) -> SpreadScanner {
        SpreadScanner::new(EngineConfig::default(), FeeSchedule::default(), pairs)
    }

    fn no_gas() -> GasSnapshot {
        FixedGasOracle::new(Decimal::ZERO).snapshot()
    }

    #[test]
    fn test_profitable_intra_polymarket_spread() {
        // 0.45 + 0.53 with a $0.005 gas allowance: edge = 0.015, below the
        // default 2c threshold, so run with a 1c threshold to verify the
        // edge arithmetic exactly.
        let mut config = EngineConfig::default();
        config.min_spread_cents = 1;
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        let s = SpreadScanner::new(config, FeeSchedule::default(), vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![(dec!(0.45), 10)], vec![(dec!(0.53), 10)]),
        );

        let gas = FixedGasOracle::new(dec!(0.005)).snapshot();
        let signal = s.evaluate_pair(&pair, &books, &gas).expect("signal");

        assert_eq!(signal.net_edge, dec!(0.015));
        assert_eq!(signal.max_qty, 10);
        assert_eq!(signal.yes_ask, dec!(0.45));
        assert_eq!(signal.no_ask, dec!(0.53));
        assert_eq!(signal.gas_per_contract, dec!(0.005));
        assert_eq!(signal.fees_per_contract, Decimal::ZERO);
    }

    #[test]
    fn test_zero_edge_is_suppressed() {
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![(dec!(0.50), 10)], vec![(dec!(0.50), 10)]),
        );

        assert!(s.evaluate_pair(&pair, &books, &no_gas()).is_none());
    }

    #[test]
    fn test_edge_exactly_at_threshold_is_emitted() {
        // 0.45 + 0.53 = 0.98, zero fees and gas: edge = 0.02 == threshold.
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![(dec!(0.45), 10)], vec![(dec!(0.53), 10)]),
        );

        let signal = s.evaluate_pair(&pair, &books, &no_gas()).expect("signal");
        assert_eq!(signal.net_edge, dec!(0.02));
    }

    #[test]
    fn test_short_duration_crypto_signal_suppressed() {
        // Raw 2c spread at 0.49/0.49 on a 15m crypto market: the dynamic
        // fee is ~3c and the threshold 4c, so no signal.
        let profile = MarketProfile::new(true, DurationClass::Min15);
        let pair = MarketPair::intra(Venue::Polymarket, "0xbtc", profile);
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xbtc")),
            poly_book("0xbtc", vec![(dec!(0.49), 100)], vec![(dec!(0.49), 100)]),
        );

        assert!(s.evaluate_pair(&pair, &books, &no_gas()).is_none());
    }

    #[test]
    fn test_missing_ask_side_skips_market() {
        // Kalshi with no no-bids: the synthetic yes-ask ladder is empty.
        let pair = MarketPair::intra(Venue::Kalshi, "KXTEST", MarketProfile::default());
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Kalshi, SmolStr::new("KXTEST")),
            kalshi_book("KXTEST", vec![], vec![(dec!(0.55), 100)]),
        );

        assert!(s.evaluate_pair(&pair, &books, &no_gas()).is_none());
    }

    #[test]
    fn test_depth_walk_stops_at_unprofitable_level() {
        // Top level pair nets 6c on 10 contracts; the second yes level at
        // 0.52 would net less than the 2c threshold, so the walk stops.
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book(
                "0xcond",
                vec![(dec!(0.40), 10), (dec!(0.52), 200)],
                vec![(dec!(0.54), 500)],
            ),
        );

        let signal = s.evaluate_pair(&pair, &books, &no_gas()).expect("signal");
        assert_eq!(signal.max_qty, 10);
        assert_eq!(signal.yes_limit, dec!(0.40));
        assert_eq!(signal.no_limit, dec!(0.54));
    }

    #[test]
    fn test_depth_walk_extends_through_profitable_levels() {
        // Both second levels still clear the threshold: walk takes them.
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book(
                "0xcond",
                vec![(dec!(0.40), 10), (dec!(0.42), 20)],
                vec![(dec!(0.54), 50)],
            ),
        );

        let signal = s.evaluate_pair(&pair, &books, &no_gas()).expect("signal");
        assert_eq!(signal.max_qty, 30);
        assert_eq!(signal.yes_limit, dec!(0.42));
    }

    #[test]
    fn test_capacity_cap_bounds_quantity() {
        let mut config = EngineConfig::default();
        config.capacity_cap_contracts = 25;
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        let s = SpreadScanner::new(config, FeeSchedule::default(), vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![(dec!(0.40), 1000)], vec![(dec!(0.54), 1000)]),
        );

        let signal = s.evaluate_pair(&pair, &books, &no_gas()).expect("signal");
        assert_eq!(signal.max_qty, 25);
    }

    #[test]
    fn test_cross_venue_uses_elevated_threshold() {
        // 3c edge clears the intra 2c threshold but not the elevated 4c
        // cross-venue tier.
        let pair = MarketPair::cross("KXTEST", "0xcond", MarketProfile::default());
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        // Kalshi yes ask 0.44 (fee per contract at 0.44: ceil(0.0173)=0.02).
        books.insert(
            (Venue::Kalshi, SmolStr::new("KXTEST")),
            kalshi_book("KXTEST", vec![(dec!(0.44), 100)], vec![]),
        );
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![], vec![(dec!(0.51), 100)]),
        );

        // Edge = 1 - 0.44 - 0.51 - 0.02 = 0.03 < 0.04.
        assert!(s.evaluate_pair(&pair, &books, &no_gas()).is_none());

        // Widen to clear the elevated tier: no ask 0.49.
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![], vec![(dec!(0.49), 100)]),
        );
        let signal = s.evaluate_pair(&pair, &books, &no_gas()).expect("signal");
        assert_eq!(signal.net_edge, dec!(0.05));
    }

    #[test]
    fn test_on_book_update_only_touches_indexed_pairs() {
        let pair_a = MarketPair::intra(Venue::Polymarket, "0xa", MarketProfile::default());
        let pair_b = MarketPair::intra(Venue::Polymarket, "0xb", MarketProfile::default());
        let s = scanner(vec![pair_a, pair_b]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xa")),
            poly_book("0xa", vec![(dec!(0.40), 10)], vec![(dec!(0.54), 10)]),
        );
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xb")),
            poly_book("0xb", vec![(dec!(0.40), 10)], vec![(dec!(0.54), 10)]),
        );

        let signals = s.on_book_update(&books, &(Venue::Polymarket, SmolStr::new("0xa")), &no_gas());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].pair.yes.market_id, "0xa");
    }

    #[test]
    fn test_expired_pair_skipped() {
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default())
            .with_expiry(Utc::now() - chrono::Duration::hours(1));
        let s = scanner(vec![pair.clone()]);

        let mut books = BookView::new();
        books.insert(
            (Venue::Polymarket, SmolStr::new("0xcond")),
            poly_book("0xcond", vec![(dec!(0.40), 10)], vec![(dec!(0.54), 10)]),
        );

        assert!(s.evaluate_pair(&pair, &books, &no_gas()).is_none());
    }
}

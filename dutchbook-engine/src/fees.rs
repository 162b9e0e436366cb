//! Venue fee schedule.
//!
//! All fee math is exact decimal arithmetic. Kalshi's taker fee rounds up
//! to the next cent; reproducing that direction exactly matters because the
//! scanner's edge computation must never overstate profitability.

use dutchbook_instrument::{MarketProfile, Venue};
use rust_decimal::Decimal;

/// Fee schedule for both venues.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Dynamic fee ceiling for Polymarket crypto 15m/1h markets.
    pub poly_dynamic_fee_ceiling: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            poly_dynamic_fee_ceiling: Decimal::new(3, 2),
        }
    }
}

impl FeeSchedule {
    pub fn new(poly_dynamic_fee_ceiling: Decimal) -> Self {
        Self { poly_dynamic_fee_ceiling }
    }

    /// Kalshi taker fee in dollars: `0.07 * qty * P * (1 - P)`, rounded up
    /// to the next cent.
    pub fn kalshi_taker_fee(&self, price: Decimal, qty: u32) -> Decimal {
        if qty == 0 {
            return Decimal::ZERO;
        }
        let raw = Decimal::new(7, 2) * Decimal::from(qty) * price * (Decimal::ONE - price);
        ceil_to_cent(raw)
    }

    /// Polymarket taker fee in dollars.
    ///
    /// Zero for most markets. Crypto markets with 15m/1h duration carry a
    /// price-dependent taker fee peaking at the ceiling when the trade price
    /// is $0.50: `rate(P) = ceiling * (1 - 4 * (P - 0.5)^2)`.
    pub fn polymarket_taker_fee(&self, price: Decimal, qty: u32, profile: &MarketProfile) -> Decimal {
        let rate = self.polymarket_fee_rate(price, profile);
        if rate.is_zero() {
            return Decimal::ZERO;
        }
        ceil_to_cent(rate * price * Decimal::from(qty))
    }

    /// Effective Polymarket fee rate at a trade price.
    pub fn polymarket_fee_rate(&self, price: Decimal, profile: &MarketProfile) -> Decimal {
        if !profile.is_short_duration_crypto() {
            return Decimal::ZERO;
        }
        let distance = price - Decimal::new(5, 1);
        let shape = Decimal::ONE - Decimal::from(4) * distance * distance;
        let shape = shape.max(Decimal::ZERO);
        (self.poly_dynamic_fee_ceiling * shape).min(self.poly_dynamic_fee_ceiling)
    }

    /// Worst-case taker fee per contract for one leg at a quoted price.
    ///
    /// Used by the scanner, which assumes both legs execute at top-of-book.
    /// Kalshi's per-contract fee uses qty = 1, which the cent round-up makes
    /// the most conservative batch size.
    pub fn fee_per_contract(&self, venue: Venue, price: Decimal, profile: &MarketProfile) -> Decimal {
        match venue {
            Venue::Kalshi => self.kalshi_taker_fee(price, 1),
            Venue::Polymarket => {
                let rate = self.polymarket_fee_rate(price, profile);
                rate * price
            }
        }
    }
}

/// Round a dollar amount up to the next cent.
fn ceil_to_cent(amount: Decimal) -> Decimal {
    (amount * Decimal::from(100)).ceil() / Decimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dutchbook_instrument::DurationClass;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kalshi_fee_rounds_up_to_cent() {
        let fees = FeeSchedule::default();
        // 0.07 * 100 * 0.50 * 0.50 = 1.75 exactly: no rounding needed.
        assert_eq!(fees.kalshi_taker_fee(dec!(0.50), 100), dec!(1.75));
        // 0.07 * 10 * 0.45 * 0.55 = 0.17325 -> 0.18.
        assert_eq!(fees.kalshi_taker_fee(dec!(0.45), 10), dec!(0.18));
        // 0.07 * 1 * 0.45 * 0.55 = 0.017325 -> 0.02.
        assert_eq!(fees.kalshi_taker_fee(dec!(0.45), 1), dec!(0.02));
    }

    #[test]
    fn test_kalshi_fee_symmetric_and_peaked_at_half() {
        let fees = FeeSchedule::default();
        assert_eq!(
            fees.kalshi_taker_fee(dec!(0.40), 100),
            fees.kalshi_taker_fee(dec!(0.60), 100)
        );
        assert!(fees.kalshi_taker_fee(dec!(0.50), 100) > fees.kalshi_taker_fee(dec!(0.40), 100));
        assert_eq!(fees.kalshi_taker_fee(dec!(0.50), 0), Decimal::ZERO);
    }

    #[test]
    fn test_polymarket_base_fee_is_zero() {
        let fees = FeeSchedule::default();
        let profile = MarketProfile::default();
        assert_eq!(fees.polymarket_taker_fee(dec!(0.50), 100, &profile), Decimal::ZERO);

        // Crypto but long-dated: still zero.
        let daily = MarketProfile::new(true, DurationClass::Daily);
        assert_eq!(fees.polymarket_taker_fee(dec!(0.50), 100, &daily), Decimal::ZERO);
    }

    #[test]
    fn test_polymarket_dynamic_fee_peaks_at_ceiling() {
        let fees = FeeSchedule::default();
        let profile = MarketProfile::new(true, DurationClass::Min15);

        assert_eq!(fees.polymarket_fee_rate(dec!(0.50), &profile), dec!(0.03));
        // Symmetric around 0.50.
        assert_eq!(
            fees.polymarket_fee_rate(dec!(0.30), &profile),
            fees.polymarket_fee_rate(dec!(0.70), &profile)
        );
        // Falls off toward the extremes.
        assert!(fees.polymarket_fee_rate(dec!(0.10), &profile) < dec!(0.01));
        // Never exceeds the ceiling.
        assert!(fees.polymarket_fee_rate(dec!(0.49), &profile) <= dec!(0.03));
    }

    #[test]
    fn test_dynamic_fee_near_half_suppresses_two_cent_spread() {
        // 15-minute crypto market quoted 0.49/0.49: the per-contract fee on
        // both legs eats the whole raw 2c spread.
        let fees = FeeSchedule::default();
        let profile = MarketProfile::new(true, DurationClass::Min15);

        let per_contract = fees.fee_per_contract(Venue::Polymarket, dec!(0.49), &profile)
            + fees.fee_per_contract(Venue::Polymarket, dec!(0.49), &profile);
        assert!(per_contract > dec!(0.029), "fee was {per_contract}");

        let edge = Decimal::ONE - dec!(0.49) - dec!(0.49) - per_contract;
        assert!(edge < Decimal::ZERO);
    }

    #[test]
    fn test_fee_per_contract_kalshi_uses_single_contract_ceiling() {
        let fees = FeeSchedule::default();
        let profile = MarketProfile::default();
        // Per-contract: ceil(0.07 * 0.45 * 0.55) = ceil(0.0173) = 0.02.
        assert_eq!(fees.fee_per_contract(Venue::Kalshi, dec!(0.45), &profile), dec!(0.02));
    }
}

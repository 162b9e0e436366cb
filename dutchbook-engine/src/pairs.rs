//! Market pairings.
//!
//! A pairing names where the Yes leg and the No leg are bought. Intra-market
//! pairings buy both outcomes of the same market on the same venue and are
//! always eligible. Cross-venue pairings combine a Kalshi market with a
//! resolution-equivalent Polymarket market and are only eligible when the
//! static whitelist permits them.

use chrono::{DateTime, Utc};
use dutchbook_instrument::{MarketKey, MarketProfile, Outcome, Venue};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashSet;

/// One monitored pairing.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct MarketPair {
    /// Where the Yes leg is bought.
    pub yes: MarketKey,
    /// Where the No leg is bought.
    pub no: MarketKey,
    pub profile: MarketProfile,
    /// Resolution time when known; expired pairs are skipped.
    pub expiry: Option<DateTime<Utc>>,
}

impl MarketPair {
    /// Both legs on one market of one venue.
    pub fn intra(venue: Venue, market_id: impl Into<SmolStr>, profile: MarketProfile) -> Self {
        let market_id = market_id.into();
        Self {
            yes: MarketKey::new(venue, market_id.clone(), Outcome::Yes),
            no: MarketKey::new(venue, market_id, Outcome::No),
            profile,
            expiry: None,
        }
    }

    /// Kalshi Yes + Polymarket No (or the reverse via `flip`).
    pub fn cross(
        kalshi_ticker: impl Into<SmolStr>,
        polymarket_condition: impl Into<SmolStr>,
        profile: MarketProfile,
    ) -> Self {
        Self {
            yes: MarketKey::kalshi_yes(kalshi_ticker),
            no: MarketKey::polymarket_no(polymarket_condition),
            profile,
            expiry: None,
        }
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Swap which venue provides which leg.
    pub fn flipped(&self) -> Self {
        Self {
            yes: MarketKey::new(self.no.venue, self.no.market_id.clone(), Outcome::Yes),
            no: MarketKey::new(self.yes.venue, self.yes.market_id.clone(), Outcome::No),
            profile: self.profile,
            expiry: self.expiry,
        }
    }

    pub fn is_cross_venue(&self) -> bool {
        (self.yes.venue, &self.yes.market_id) != (self.no.venue, &self.no.market_id)
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.map(|expiry| expiry <= Utc::now()).unwrap_or(false)
    }

    /// The distinct `(venue, market_id)` pairs this trade touches.
    pub fn markets(&self) -> Vec<(Venue, SmolStr)> {
        let yes = self.yes.market();
        let no = self.no.market();
        if yes == no {
            vec![yes]
        } else {
            vec![yes, no]
        }
    }
}

impl std::fmt::Display for MarketPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.yes, self.no)
    }
}

/// Static whitelist of resolution-equivalent cross-venue pairs.
#[derive(Clone, Debug, Default)]
pub struct CrossVenueWhitelist {
    pairs: HashSet<(SmolStr, SmolStr)>,
}

impl CrossVenueWhitelist {
    pub fn new(pairs: HashSet<(SmolStr, SmolStr)>) -> Self {
        Self { pairs }
    }

    /// A cross-venue pairing is permitted only if its
    /// `(kalshi_market, polymarket_market)` combination is listed.
    pub fn permits(&self, pair: &MarketPair) -> bool {
        if !pair.is_cross_venue() {
            return true;
        }
        let (kalshi, poly) = match (pair.yes.venue, pair.no.venue) {
            (Venue::Kalshi, Venue::Polymarket) => (&pair.yes.market_id, &pair.no.market_id),
            (Venue::Polymarket, Venue::Kalshi) => (&pair.no.market_id, &pair.yes.market_id),
            _ => return false,
        };
        self.pairs.contains(&(kalshi.clone(), poly.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_intra_pair_touches_one_market() {
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        assert!(!pair.is_cross_venue());
        assert_eq!(pair.markets().len(), 1);
        assert_eq!(pair.yes.market_id, pair.no.market_id);
    }

    #[test]
    fn test_cross_pair_touches_two_markets() {
        let pair = MarketPair::cross("KXTEST", "0xcond", MarketProfile::default());
        assert!(pair.is_cross_venue());
        assert_eq!(pair.markets().len(), 2);
        assert_eq!(pair.yes.venue, Venue::Kalshi);
        assert_eq!(pair.no.venue, Venue::Polymarket);
    }

    #[test]
    fn test_flipped_swaps_legs() {
        let pair = MarketPair::cross("KXTEST", "0xcond", MarketProfile::default());
        let flipped = pair.flipped();
        assert_eq!(flipped.yes.venue, Venue::Polymarket);
        assert_eq!(flipped.no.venue, Venue::Kalshi);
        assert_eq!(flipped.no.market_id, "KXTEST");
    }

    #[test]
    fn test_expiry() {
        let pair = MarketPair::intra(Venue::Kalshi, "KXTEST", MarketProfile::default());
        assert!(!pair.is_expired());
        let expired = pair.clone().with_expiry(Utc::now() - Duration::hours(1));
        assert!(expired.is_expired());
    }

    #[test]
    fn test_whitelist_permits_intra_always() {
        let whitelist = CrossVenueWhitelist::default();
        let pair = MarketPair::intra(Venue::Polymarket, "0xcond", MarketProfile::default());
        assert!(whitelist.permits(&pair));
    }

    #[test]
    fn test_whitelist_gates_cross_venue() {
        let mut listed = HashSet::new();
        listed.insert((SmolStr::new("KXTEST"), SmolStr::new("0xcond")));
        let whitelist = CrossVenueWhitelist::new(listed);

        let pair = MarketPair::cross("KXTEST", "0xcond", MarketProfile::default());
        assert!(whitelist.permits(&pair));
        assert!(whitelist.permits(&pair.flipped()));

        let unlisted = MarketPair::cross("KXOTHER", "0xcond", MarketProfile::default());
        assert!(!whitelist.permits(&unlisted));
    }
}

//! Unified order book model.
//!
//! One [`MarketBook`] holds the four price ladders of a binary market. For
//! Kalshi the ask ladders are synthetic (see [`crate::kalshi::book`]); for
//! Polymarket all four are native. Quantities are `Decimal` because
//! Polymarket publishes fractional share sizes; the engine floors to whole
//! contracts when sizing.

use chrono::{DateTime, Utc};
use dutchbook_instrument::Venue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Minimum price increment shared by both venues (one cent).
pub const TICK: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// A single price level: price in dollars, aggregated quantity.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Level {
    pub price: Decimal,
    pub qty: Decimal,
}

impl Level {
    pub fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }
}

/// A one-sided price ladder, ordered best-first.
///
/// Bids sort descending by price, asks ascending. The constructor enforces
/// the ordering so consumers can index `levels[0]` as top-of-book.
#[derive(Clone, PartialEq, Eq, Debug, Default, Deserialize, Serialize)]
pub struct Ladder {
    levels: Vec<Level>,
}

impl Ladder {
    /// Build a bid ladder (descending by price).
    pub fn bids(mut levels: Vec<Level>) -> Self {
        levels.sort_by(|a, b| b.price.cmp(&a.price));
        Self { levels }
    }

    /// Build an ask ladder (ascending by price).
    pub fn asks(mut levels: Vec<Level>) -> Self {
        levels.sort_by(|a, b| a.price.cmp(&b.price));
        Self { levels }
    }

    /// Top of book, `None` when the side has no liquidity.
    pub fn best(&self) -> Option<&Level> {
        self.levels.first()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Errors surfaced while validating or updating a book.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("crossed book on {side} side: bid {bid} >= ask {ask}")]
    Crossed {
        side: &'static str,
        bid: Decimal,
        ask: Decimal,
    },
    #[error("sequence gap: have {have}, received {received}")]
    SequenceGap { have: u64, received: u64 },
}

/// Unified order book for one binary market on one venue.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct MarketBook {
    pub venue: Venue,
    pub market_id: SmolStr,
    /// Venue sequence number of the last applied update.
    pub seq: u64,
    pub last_update: DateTime<Utc>,
    /// Venue-flagged provisional markets are held back from publication.
    pub provisional: bool,
    pub yes_bids: Ladder,
    pub no_bids: Ladder,
    pub yes_asks: Ladder,
    pub no_asks: Ladder,
}

impl MarketBook {
    pub fn best_yes_bid(&self) -> Option<&Level> {
        self.yes_bids.best()
    }

    pub fn best_no_bid(&self) -> Option<&Level> {
        self.no_bids.best()
    }

    /// Best executable Yes ask. `None` means no liquidity.
    pub fn best_yes_ask(&self) -> Option<&Level> {
        self.yes_asks.best()
    }

    /// Best executable No ask. `None` means no liquidity.
    pub fn best_no_ask(&self) -> Option<&Level> {
        self.no_asks.best()
    }

    /// Reject malformed books: a top-of-book cross on either outcome that a
    /// pending update cannot explain.
    pub fn validate(&self) -> Result<(), BookError> {
        for (side, bids, asks) in [
            ("yes", &self.yes_bids, &self.yes_asks),
            ("no", &self.no_bids, &self.no_asks),
        ] {
            if let (Some(bid), Some(ask)) = (bids.best(), asks.best()) {
                if bid.price > ask.price - TICK {
                    return Err(BookError::Crossed {
                        side,
                        bid: bid.price,
                        ask: ask.price,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, qty: u32) -> Level {
        Level::new(price, Decimal::from(qty))
    }

    fn book(
        yes_bids: Vec<Level>,
        yes_asks: Vec<Level>,
        no_bids: Vec<Level>,
        no_asks: Vec<Level>,
    ) -> MarketBook {
        MarketBook {
            venue: Venue::Polymarket,
            market_id: SmolStr::new("0xcond"),
            seq: 1,
            last_update: Utc::now(),
            provisional: false,
            yes_bids: Ladder::bids(yes_bids),
            no_bids: Ladder::bids(no_bids),
            yes_asks: Ladder::asks(yes_asks),
            no_asks: Ladder::asks(no_asks),
        }
    }

    #[test]
    fn test_ladder_ordering() {
        let bids = Ladder::bids(vec![level(dec!(0.40), 10), level(dec!(0.45), 5)]);
        assert_eq!(bids.best().unwrap().price, dec!(0.45));

        let asks = Ladder::asks(vec![level(dec!(0.50), 10), level(dec!(0.47), 5)]);
        assert_eq!(asks.best().unwrap().price, dec!(0.47));
    }

    #[test]
    fn test_empty_side_has_no_top() {
        let b = book(vec![level(dec!(0.45), 10)], vec![], vec![], vec![]);
        assert!(b.best_yes_ask().is_none());
        assert!(b.best_yes_bid().is_some());
    }

    #[test]
    fn test_validate_accepts_tick_separated_book() {
        let b = book(
            vec![level(dec!(0.45), 10)],
            vec![level(dec!(0.46), 10)],
            vec![level(dec!(0.54), 10)],
            vec![level(dec!(0.55), 10)],
        );
        assert!(b.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_crossed_book() {
        let b = book(
            vec![level(dec!(0.47), 10)],
            vec![level(dec!(0.46), 10)],
            vec![],
            vec![],
        );
        let err = b.validate().unwrap_err();
        assert!(matches!(err, BookError::Crossed { side: "yes", .. }));
    }

    #[test]
    fn test_validate_rejects_locked_book() {
        // bid == ask violates best_bid <= best_ask - tick
        let b = book(
            vec![],
            vec![],
            vec![level(dec!(0.50), 10)],
            vec![level(dec!(0.50), 10)],
        );
        assert!(b.validate().is_err());
    }
}

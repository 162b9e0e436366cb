//! Polymarket per-condition pair book.
//!
//! The CLOB publishes one book per outcome token. A binary market is two
//! tokens sharing a condition id, so the pair book tracks both and merges
//! them into the unified four-ladder [`MarketBook`]. All four ladders are
//! native here; no synthesis is needed.

use chrono::Utc;
use dutchbook_instrument::{Outcome, Venue};
use smol_str::SmolStr;

use crate::books::{BookError, Ladder, Level, MarketBook};
use crate::polymarket::message::PolymarketBookEvent;

/// One outcome token's resting book.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
struct TokenBook {
    bids: Vec<Level>,
    asks: Vec<Level>,
    /// Millisecond timestamp of the last applied event; doubles as the
    /// sequence number for staleness checks.
    ts: u64,
}

/// Pair book for one condition: Yes token + No token.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PolymarketPairBook {
    yes: TokenBook,
    no: TokenBook,
}

impl PolymarketPairBook {
    /// Apply a full book event for one outcome token.
    ///
    /// Events older than the held book (by timestamp) are stale replays and
    /// are ignored. Unparseable levels are dropped.
    pub fn apply(&mut self, outcome: Outcome, event: &PolymarketBookEvent) -> Result<(), BookError> {
        let ts = event.timestamp.unwrap_or(0);
        let token = match outcome {
            Outcome::Yes => &mut self.yes,
            Outcome::No => &mut self.no,
        };
        if ts != 0 && ts < token.ts {
            return Ok(());
        }

        token.bids = Self::parse_levels(&event.bids);
        token.asks = Self::parse_levels(&event.asks);
        token.ts = ts.max(token.ts);
        Ok(())
    }

    fn parse_levels(raw: &[crate::polymarket::message::PolymarketLevel]) -> Vec<Level> {
        raw.iter()
            .filter_map(|level| Some(Level::new(level.price_decimal()?, level.size_decimal()?)))
            .collect()
    }

    /// Produce the unified four-ladder book.
    pub fn unify(&self, condition_id: &SmolStr, provisional: bool) -> MarketBook {
        MarketBook {
            venue: Venue::Polymarket,
            market_id: condition_id.clone(),
            seq: self.yes.ts.max(self.no.ts),
            last_update: Utc::now(),
            provisional,
            yes_bids: Ladder::bids(self.yes.bids.clone()),
            no_bids: Ladder::bids(self.no.bids.clone()),
            yes_asks: Ladder::asks(self.yes.asks.clone()),
            no_asks: Ladder::asks(self.no.asks.clone()),
        }
    }
}

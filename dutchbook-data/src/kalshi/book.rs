//! Kalshi per-market book with synthetic ask reconstruction.
//!
//! Kalshi's feed carries bids only. Buying Yes at price `p` is matched
//! against a resting No bid at `1.00 - p`, so both ask ladders are exact
//! reflections of the opposing bid ladder:
//!
//! ```text
//! ask_yes(p) = 1.00 - bid_no(1.00 - p)    qty(ask_yes) = qty(bid_no)
//! ask_no(p)  = 1.00 - bid_yes(1.00 - p)   qty(ask_no)  = qty(bid_yes)
//! ```
//!
//! The reflection is linear, so the full synthetic ladder is recomputed on
//! every bid update in O(levels). An empty opposing bid side yields an empty
//! ask ladder: top-of-book `None` is the "no liquidity" sentinel.

use std::collections::BTreeMap;

use chrono::Utc;
use dutchbook_instrument::{cents_to_decimal, Venue};
use rust_decimal::Decimal;
use smol_str::SmolStr;

use crate::books::{BookError, Ladder, Level, MarketBook};
use crate::kalshi::message::{KalshiBookDelta, KalshiBookSnapshot};

/// Bid-ladder state for one Kalshi market.
///
/// Keys are cent prices, values are contract quantities. Zero-quantity
/// levels are removed.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct KalshiBook {
    yes_bids: BTreeMap<u32, u32>,
    no_bids: BTreeMap<u32, u32>,
    seq: u64,
}

impl KalshiBook {
    /// Rebuild the book from a snapshot, discarding prior state.
    pub fn from_snapshot(snapshot: &KalshiBookSnapshot) -> Self {
        let mut book = Self {
            seq: snapshot.seq,
            ..Self::default()
        };
        for &(price, qty) in &snapshot.msg.yes {
            if qty > 0 {
                book.yes_bids.insert(price, qty);
            }
        }
        for &(price, qty) in &snapshot.msg.no {
            if qty > 0 {
                book.no_bids.insert(price, qty);
            }
        }
        book
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Apply an incremental bid change.
    ///
    /// Deltas at or below the current sequence are stale replays and are
    /// ignored, which makes snapshot-then-replayed-deltas idempotent. A jump
    /// past `seq + 1` means the feed dropped a message: the caller must park
    /// the book and request a fresh snapshot.
    pub fn apply_delta(&mut self, delta: &KalshiBookDelta) -> Result<(), BookError> {
        if delta.seq <= self.seq {
            return Ok(());
        }
        if delta.seq != self.seq + 1 {
            return Err(BookError::SequenceGap {
                have: self.seq,
                received: delta.seq,
            });
        }

        let side = match delta.msg.side.as_str() {
            "yes" => &mut self.yes_bids,
            "no" => &mut self.no_bids,
            _ => {
                self.seq = delta.seq;
                return Ok(());
            }
        };

        let current = side.get(&delta.msg.price).copied().unwrap_or(0) as i64;
        let updated = (current + i64::from(delta.msg.delta)).max(0) as u32;
        if updated == 0 {
            side.remove(&delta.msg.price);
        } else {
            side.insert(delta.msg.price, updated);
        }

        self.seq = delta.seq;
        Ok(())
    }

    /// Drop all levels (market lifecycle events clear the book).
    pub fn clear(&mut self, seq: u64) {
        self.yes_bids.clear();
        self.no_bids.clear();
        self.seq = seq;
    }

    /// Best Yes bid in cents, if any.
    pub fn best_yes_bid_cents(&self) -> Option<(u32, u32)> {
        self.yes_bids.iter().next_back().map(|(&p, &q)| (p, q))
    }

    /// Best No bid in cents, if any.
    pub fn best_no_bid_cents(&self) -> Option<(u32, u32)> {
        self.no_bids.iter().next_back().map(|(&p, &q)| (p, q))
    }

    /// Produce the unified four-ladder book.
    ///
    /// Bid ladders are native; both ask ladders are full reflections of the
    /// opposing bid ladder with mirrored quantities.
    pub fn unify(&self, market_id: &SmolStr, provisional: bool) -> MarketBook {
        MarketBook {
            venue: Venue::Kalshi,
            market_id: market_id.clone(),
            seq: self.seq,
            last_update: Utc::now(),
            provisional,
            yes_bids: Ladder::bids(Self::native_levels(&self.yes_bids)),
            no_bids: Ladder::bids(Self::native_levels(&self.no_bids)),
            yes_asks: Ladder::asks(Self::reflected_levels(&self.no_bids)),
            no_asks: Ladder::asks(Self::reflected_levels(&self.yes_bids)),
        }
    }

    fn native_levels(bids: &BTreeMap<u32, u32>) -> Vec<Level> {
        bids.iter()
            .map(|(&price, &qty)| Level::new(cents_to_decimal(price), Decimal::from(qty)))
            .collect()
    }

    fn reflected_levels(opposing_bids: &BTreeMap<u32, u32>) -> Vec<Level> {
        opposing_bids
            .iter()
            .map(|(&price, &qty)| {
                Level::new(cents_to_decimal(100 - price), Decimal::from(qty))
            })
            .collect()
    }
}

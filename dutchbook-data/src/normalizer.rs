//! Market data normalizer.
//!
//! Folds both venue feeds into one [`MarketBook`] per `(venue, market)` and
//! publishes an immutable snapshot after every consistent update.
//!
//! Consistency rules:
//! - Kalshi deltas must extend the sequence exactly; on a gap the book is
//!   parked, a [`ResyncRequest`] is emitted, and further deltas are dropped
//!   until the next snapshot.
//! - A book that validates as crossed is never published; the update is
//!   dropped and a resync is requested.
//! - Venue-flagged provisional markets are held, never published.
//!
//! The normalizer is the only writer of book state; the strategy only ever
//! sees the published `Arc` snapshots, so per-market updates are totally
//! ordered downstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dutchbook_instrument::{Outcome, Venue};
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::books::MarketBook;
use crate::kalshi::book::KalshiBook;
use crate::kalshi::message::{KalshiBookDelta, KalshiBookSnapshot, KalshiLifecycle};
use crate::polymarket::book::PolymarketPairBook;
use crate::polymarket::message::PolymarketBookEvent;
use crate::recorder::BookRecorder;

/// A published book snapshot.
pub type BookUpdate = Arc<MarketBook>;

/// Request for a fresh snapshot of one market, emitted on gaps and
/// malformed updates. The owning feed task services these.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResyncRequest {
    pub venue: Venue,
    pub market_id: SmolStr,
}

/// Maps Polymarket outcome-token asset ids to their condition and outcome.
#[derive(Clone, Debug, Default)]
pub struct TokenRegistry {
    tokens: HashMap<SmolStr, (SmolStr, Outcome)>,
}

impl TokenRegistry {
    pub fn insert(
        &mut self,
        asset_id: impl Into<SmolStr>,
        condition_id: impl Into<SmolStr>,
        outcome: Outcome,
    ) {
        self.tokens
            .insert(asset_id.into(), (condition_id.into(), outcome));
    }

    pub fn resolve(&self, asset_id: &str) -> Option<&(SmolStr, Outcome)> {
        self.tokens.get(asset_id)
    }
}

enum KalshiState {
    Synced(KalshiBook),
    /// Parked after a gap or malformed update; deltas are discarded until
    /// the next snapshot.
    AwaitingSnapshot,
}

/// The normalizer: owns all book state, publishes consistent snapshots.
pub struct Normalizer {
    kalshi: HashMap<SmolStr, KalshiState>,
    polymarket: HashMap<SmolStr, PolymarketPairBook>,
    tokens: TokenRegistry,
    provisional: HashSet<(Venue, SmolStr)>,
    updates: mpsc::Sender<BookUpdate>,
    resyncs: mpsc::Sender<ResyncRequest>,
    recorder: Option<BookRecorder>,
}

impl Normalizer {
    pub fn new(
        tokens: TokenRegistry,
        updates: mpsc::Sender<BookUpdate>,
        resyncs: mpsc::Sender<ResyncRequest>,
    ) -> Self {
        Self {
            kalshi: HashMap::new(),
            polymarket: HashMap::new(),
            tokens,
            provisional: HashSet::new(),
            updates,
            resyncs,
            recorder: None,
        }
    }

    /// Attach a snapshot recorder (see [`BookRecorder::from_env`]).
    pub fn with_recorder(mut self, recorder: BookRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Flag or unflag a market as provisional. Provisional books are
    /// maintained but not published.
    pub fn set_provisional(&mut self, venue: Venue, market_id: impl Into<SmolStr>, held: bool) {
        let key = (venue, market_id.into());
        if held {
            self.provisional.insert(key);
        } else {
            self.provisional.remove(&key);
        }
    }

    /// A snapshot always resyncs the market, clearing any parked state.
    pub async fn on_kalshi_snapshot(&mut self, snapshot: &KalshiBookSnapshot) {
        let ticker = SmolStr::new(&snapshot.msg.market_ticker);
        let book = KalshiBook::from_snapshot(snapshot);
        let unified = book.unify(&ticker, self.is_provisional(Venue::Kalshi, &ticker));
        self.kalshi.insert(ticker.clone(), KalshiState::Synced(book));
        self.publish(unified).await;
    }

    pub async fn on_kalshi_delta(&mut self, delta: &KalshiBookDelta) {
        let ticker = SmolStr::new(&delta.msg.market_ticker);
        let provisional = self.is_provisional(Venue::Kalshi, &ticker);

        let state = match self.kalshi.remove(&ticker) {
            Some(state) => state,
            None => {
                // Delta before any snapshot: request one and wait.
                self.kalshi.insert(ticker.clone(), KalshiState::AwaitingSnapshot);
                self.request_resync(Venue::Kalshi, ticker).await;
                return;
            }
        };

        let mut book = match state {
            KalshiState::Synced(book) => book,
            KalshiState::AwaitingSnapshot => {
                debug!(market = %ticker, "discarding delta while awaiting snapshot");
                self.kalshi.insert(ticker, KalshiState::AwaitingSnapshot);
                return;
            }
        };

        match book.apply_delta(delta) {
            Ok(()) => {
                let unified = book.unify(&ticker, provisional);
                self.kalshi.insert(ticker, KalshiState::Synced(book));
                self.publish(unified).await;
            }
            Err(err) => {
                warn!(market = %ticker, %err, "kalshi book desynced, requesting snapshot");
                self.kalshi.insert(ticker.clone(), KalshiState::AwaitingSnapshot);
                self.request_resync(Venue::Kalshi, ticker).await;
            }
        }
    }

    /// Lifecycle events (close, settle) clear the book, which removes the
    /// market from arbitrage consideration downstream.
    pub async fn on_kalshi_lifecycle(&mut self, lifecycle: &KalshiLifecycle) {
        let ticker = SmolStr::new(&lifecycle.msg.market_ticker);
        warn!(
            market = %ticker,
            event = %lifecycle.msg.event_type,
            "market lifecycle event, clearing book"
        );
        let provisional = self.is_provisional(Venue::Kalshi, &ticker);
        let book = match self.kalshi.get_mut(&ticker) {
            Some(KalshiState::Synced(book)) => book,
            _ => return,
        };
        book.clear(lifecycle.seq);
        let unified = book.unify(&ticker, provisional);
        self.publish(unified).await;
    }

    pub async fn on_polymarket_book(&mut self, event: &PolymarketBookEvent) {
        let (condition_id, outcome) = match self.tokens.resolve(&event.asset_id) {
            Some(entry) => entry.clone(),
            None => {
                debug!(asset_id = %event.asset_id, "book event for unregistered token");
                return;
            }
        };

        let provisional = self.is_provisional(Venue::Polymarket, &condition_id);
        let pair = self.polymarket.entry(condition_id.clone()).or_default();
        if let Err(err) = pair.apply(outcome, event) {
            warn!(market = %condition_id, %err, "polymarket book rejected");
            self.request_resync(Venue::Polymarket, condition_id).await;
            return;
        }

        let unified = pair.unify(&condition_id, provisional);
        self.publish(unified).await;
    }

    fn is_provisional(&self, venue: Venue, market_id: &SmolStr) -> bool {
        self.provisional.contains(&(venue, market_id.clone()))
    }

    async fn publish(&mut self, book: MarketBook) {
        if book.provisional {
            debug!(market = %book.market_id, "holding provisional book");
            return;
        }

        if let Err(err) = book.validate() {
            warn!(
                venue = %book.venue,
                market = %book.market_id,
                %err,
                "dropping malformed book, requesting snapshot"
            );
            let venue = book.venue;
            let market_id = book.market_id.clone();
            if venue == Venue::Kalshi {
                self.kalshi.insert(market_id.clone(), KalshiState::AwaitingSnapshot);
            }
            self.request_resync(venue, market_id).await;
            return;
        }

        if let Some(recorder) = &mut self.recorder {
            recorder.on_book_update(&book);
        }

        if self.updates.send(Arc::new(book)).await.is_err() {
            debug!("book consumer dropped");
        }
    }

    async fn request_resync(&self, venue: Venue, market_id: SmolStr) {
        let _ = self.resyncs.send(ResyncRequest { venue, market_id }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalshi::message::{
        KalshiBookDeltaData, KalshiBookSnapshotData, KalshiLifecycleData,
    };
    use crate::polymarket::message::PolymarketLevel;
    use rust_decimal_macros::dec;

    fn snapshot(ticker: &str, yes: Vec<(u32, u32)>, no: Vec<(u32, u32)>, seq: u64) -> KalshiBookSnapshot {
        KalshiBookSnapshot {
            sid: 1,
            seq,
            msg: KalshiBookSnapshotData {
                market_ticker: ticker.to_string(),
                yes,
                no,
            },
        }
    }

    fn delta(ticker: &str, price: u32, change: i32, side: &str, seq: u64) -> KalshiBookDelta {
        KalshiBookDelta {
            sid: 1,
            seq,
            msg: KalshiBookDeltaData {
                market_ticker: ticker.to_string(),
                price,
                delta: change,
                side: side.to_string(),
            },
        }
    }

    fn poly_event(asset: &str, ts: u64, bids: Vec<(&str, &str)>, asks: Vec<(&str, &str)>) -> PolymarketBookEvent {
        PolymarketBookEvent {
            event_type: Some("book".to_string()),
            asset_id: asset.to_string(),
            market: None,
            timestamp: Some(ts),
            bids: bids
                .into_iter()
                .map(|(p, s)| PolymarketLevel { price: p.into(), size: s.into() })
                .collect(),
            asks: asks
                .into_iter()
                .map(|(p, s)| PolymarketLevel { price: p.into(), size: s.into() })
                .collect(),
        }
    }

    fn normalizer() -> (
        Normalizer,
        mpsc::Receiver<BookUpdate>,
        mpsc::Receiver<ResyncRequest>,
    ) {
        let (update_tx, update_rx) = mpsc::channel(16);
        let (resync_tx, resync_rx) = mpsc::channel(16);
        let mut tokens = TokenRegistry::default();
        tokens.insert("0xyes", "0xcond", Outcome::Yes);
        tokens.insert("0xno", "0xcond", Outcome::No);
        (Normalizer::new(tokens, update_tx, resync_tx), update_rx, resync_rx)
    }

    #[tokio::test]
    async fn test_snapshot_then_delta_publishes_twice() {
        let (mut norm, mut updates, _resyncs) = normalizer();

        norm.on_kalshi_snapshot(&snapshot("KXTEST", vec![(40, 100)], vec![(55, 50)], 1))
            .await;
        let first = updates.try_recv().unwrap();
        assert_eq!(first.best_yes_bid().unwrap().price, dec!(0.40));
        assert_eq!(first.best_yes_ask().unwrap().price, dec!(0.45));

        norm.on_kalshi_delta(&delta("KXTEST", 41, 30, "yes", 2)).await;
        let second = updates.try_recv().unwrap();
        assert_eq!(second.best_yes_bid().unwrap().price, dec!(0.41));
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn test_gap_parks_book_until_snapshot() {
        let (mut norm, mut updates, mut resyncs) = normalizer();

        norm.on_kalshi_snapshot(&snapshot("KXTEST", vec![(40, 100)], vec![], 1)).await;
        updates.try_recv().unwrap();

        // seq jumps 1 -> 5: gap.
        norm.on_kalshi_delta(&delta("KXTEST", 41, 30, "yes", 5)).await;
        assert!(updates.try_recv().is_err(), "gapped delta must not publish");
        assert_eq!(
            resyncs.try_recv().unwrap(),
            ResyncRequest { venue: Venue::Kalshi, market_id: SmolStr::new("KXTEST") }
        );

        // Parked: further deltas are discarded, no resync spam.
        norm.on_kalshi_delta(&delta("KXTEST", 41, 30, "yes", 6)).await;
        assert!(updates.try_recv().is_err());

        // Snapshot resyncs; the strategy sees either the pre-gap or the
        // post-resync book, never an interleaving.
        norm.on_kalshi_snapshot(&snapshot("KXTEST", vec![(42, 10)], vec![], 7)).await;
        let book = updates.try_recv().unwrap();
        assert_eq!(book.best_yes_bid().unwrap().price, dec!(0.42));
        assert_eq!(book.seq, 7);
    }

    #[tokio::test]
    async fn test_delta_before_snapshot_requests_resync() {
        let (mut norm, mut updates, mut resyncs) = normalizer();

        norm.on_kalshi_delta(&delta("KXNEW", 40, 10, "yes", 3)).await;
        assert!(updates.try_recv().is_err());
        assert!(resyncs.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_provisional_book_is_held() {
        let (mut norm, mut updates, _resyncs) = normalizer();
        norm.set_provisional(Venue::Kalshi, "KXPROV", true);

        norm.on_kalshi_snapshot(&snapshot("KXPROV", vec![(40, 100)], vec![], 1)).await;
        assert!(updates.try_recv().is_err(), "provisional book must be held");

        norm.set_provisional(Venue::Kalshi, "KXPROV", false);
        norm.on_kalshi_delta(&delta("KXPROV", 40, 10, "yes", 2)).await;
        assert!(updates.try_recv().is_ok(), "unflagged book publishes again");
    }

    #[tokio::test]
    async fn test_lifecycle_clears_book() {
        let (mut norm, mut updates, _resyncs) = normalizer();

        norm.on_kalshi_snapshot(&snapshot("KXTEST", vec![(40, 100)], vec![(55, 50)], 1)).await;
        updates.try_recv().unwrap();

        norm.on_kalshi_lifecycle(&KalshiLifecycle {
            sid: 1,
            seq: 2,
            msg: KalshiLifecycleData {
                market_ticker: "KXTEST".to_string(),
                event_type: "settled".to_string(),
            },
        })
        .await;

        let book = updates.try_recv().unwrap();
        assert!(book.best_yes_bid().is_none());
        assert!(book.best_yes_ask().is_none());
    }

    #[tokio::test]
    async fn test_polymarket_pair_published_per_token_update() {
        let (mut norm, mut updates, _resyncs) = normalizer();

        norm.on_polymarket_book(&poly_event("0xyes", 1, vec![("0.44", "100")], vec![("0.45", "80")]))
            .await;
        let first = updates.try_recv().unwrap();
        assert_eq!(first.venue, Venue::Polymarket);
        assert_eq!(first.market_id, "0xcond");
        assert!(first.best_no_ask().is_none());

        norm.on_polymarket_book(&poly_event("0xno", 2, vec![("0.52", "60")], vec![("0.53", "40")]))
            .await;
        let second = updates.try_recv().unwrap();
        assert_eq!(second.best_yes_ask().unwrap().price, dec!(0.45));
        assert_eq!(second.best_no_ask().unwrap().price, dec!(0.53));
    }

    #[tokio::test]
    async fn test_unregistered_token_is_dropped() {
        let (mut norm, mut updates, mut resyncs) = normalizer();
        norm.on_polymarket_book(&poly_event("0xmystery", 1, vec![("0.44", "100")], vec![]))
            .await;
        assert!(updates.try_recv().is_err());
        assert!(resyncs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_crossed_kalshi_book_dropped_and_resynced() {
        let (mut norm, mut updates, mut resyncs) = normalizer();

        // Yes bid 47c and No bid 55c reflect to a Yes ask of 45c: crossed.
        norm.on_kalshi_snapshot(&snapshot("KXBAD", vec![(47, 100)], vec![(55, 50)], 1)).await;
        assert!(updates.try_recv().is_err(), "crossed book must not publish");
        assert_eq!(
            resyncs.try_recv().unwrap(),
            ResyncRequest { venue: Venue::Kalshi, market_id: SmolStr::new("KXBAD") }
        );

        // Parked until a clean snapshot arrives.
        norm.on_kalshi_delta(&delta("KXBAD", 40, 10, "yes", 2)).await;
        assert!(updates.try_recv().is_err());
    }
}

//! Engine wiring: book updates in, trade records out.
//!
//! The loop is the only place the pipeline stages meet: the scanner and risk
//! engine run synchronously on the loop task (one signal evaluation sees one
//! consistent state), while each approved arb is spawned as its own
//! [`ArbRunner`] task that owns its leg machine for its lifetime.
//!
//! Risk state (balance counters + open-leg registry) lives behind one async
//! mutex; the lock is never held across venue I/O.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dutchbook_data::normalizer::BookUpdate;
use dutchbook_execution::adapter::{KalshiOrderAdapter, PolymarketOrderAdapter};
use dutchbook_execution::chain::PolygonChain;
use dutchbook_execution::gas::GasOracle;
use dutchbook_instrument::Venue;
use serde::Serialize;
use smol_str::SmolStr;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::exec::{ArbOutcome, ArbRunner};
use crate::ledger::{FinalState, TradeStore};
use crate::risk::{Approval, OpenLegRegistry, RiskEngine, VenueBalances, VenueHealth};
use crate::scan::{BookView, SpreadScanner};

/// Counters surfaced on the control plane.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub book_updates: AtomicU64,
    pub signals: AtomicU64,
    pub approvals: AtomicU64,
    pub rejections: AtomicU64,
    pub merged: AtomicU64,
    pub settled: AtomicU64,
    pub aborted: AtomicU64,
    pub closed_at_loss: AtomicU64,
}

/// Point-in-time metrics view for `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub book_updates: u64,
    pub signals: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub merged: u64,
    pub settled: u64,
    pub aborted: u64,
    pub closed_at_loss: u64,
}

impl EngineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            book_updates: self.book_updates.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            approvals: self.approvals.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            closed_at_loss: self.closed_at_loss.load(Ordering::Relaxed),
        }
    }

    fn count_final(&self, state: FinalState) {
        let counter = match state {
            FinalState::Merged => &self.merged,
            FinalState::Settled => &self.settled,
            FinalState::Aborted => &self.aborted,
            FinalState::ClosedAtLoss => &self.closed_at_loss,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Mutable risk state, one lock, never held across venue I/O.
#[derive(Debug, Default)]
pub struct RiskState {
    pub balances: VenueBalances,
    pub legs: OpenLegRegistry,
}

/// The assembled engine.
pub struct Engine<K, P, C> {
    kalshi: Arc<K>,
    polymarket: Arc<P>,
    runner: Arc<ArbRunner<K, P, C>>,
    scanner: SpreadScanner,
    risk: RiskEngine,
    gas: Arc<dyn GasOracle>,
    store: Mutex<Box<dyn TradeStore>>,
    health: Arc<VenueHealth>,
    state: Arc<Mutex<RiskState>>,
    books: Arc<std::sync::RwLock<BookView>>,
    metrics: Arc<EngineMetrics>,
    config: EngineConfig,
    draining: AtomicBool,
}

impl<K, P, C> Engine<K, P, C>
where
    K: KalshiOrderAdapter + 'static,
    P: PolymarketOrderAdapter + 'static,
    C: PolygonChain + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kalshi: Arc<K>,
        polymarket: Arc<P>,
        runner: Arc<ArbRunner<K, P, C>>,
        scanner: SpreadScanner,
        risk: RiskEngine,
        gas: Arc<dyn GasOracle>,
        store: Box<dyn TradeStore>,
        health: Arc<VenueHealth>,
        books: Arc<std::sync::RwLock<BookView>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            kalshi,
            polymarket,
            runner,
            scanner,
            risk,
            gas,
            store: Mutex::new(store),
            health,
            state: Arc::new(Mutex::new(RiskState::default())),
            books,
            metrics: Arc::new(EngineMetrics::default()),
            config,
            draining: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    pub fn health(&self) -> Arc<VenueHealth> {
        self.health.clone()
    }

    pub fn state(&self) -> Arc<Mutex<RiskState>> {
        self.state.clone()
    }

    /// Stop accepting new signals; in-flight legs drain to terminal states.
    pub fn drain(&self) {
        info!("drain requested, refusing new signals");
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Pull fresh balances from both venues; a venue that answers is live.
    pub async fn refresh_balances(&self) {
        match self.kalshi.balance().await {
            Ok(balance) => {
                self.health.set_live(Venue::Kalshi, true);
                self.state.lock().await.balances.set(Venue::Kalshi, balance);
            }
            Err(err) => {
                if err.is_auth() {
                    error!(%err, "kalshi auth failure, marking venue down");
                    self.health.set_live(Venue::Kalshi, false);
                } else {
                    warn!(%err, "kalshi balance refresh failed");
                }
            }
        }
        match self.polymarket.balance().await {
            Ok(balance) => {
                self.health.set_live(Venue::Polymarket, true);
                self.state
                    .lock()
                    .await
                    .balances
                    .set(Venue::Polymarket, balance);
            }
            Err(err) => {
                if err.is_auth() {
                    error!(%err, "polymarket auth failure, marking venue down");
                    self.health.set_live(Venue::Polymarket, false);
                } else {
                    warn!(%err, "polymarket balance refresh failed");
                }
            }
        }
    }

    /// Main loop: consume published books until the channel closes, then
    /// drain in-flight arbs under the shutdown deadline.
    pub async fn run(self: Arc<Self>, mut book_rx: mpsc::Receiver<BookUpdate>) {
        let mut arbs: JoinSet<(Approval, ArbOutcome)> = JoinSet::new();

        loop {
            tokio::select! {
                update = book_rx.recv() => {
                    match update {
                        Some(book) => self.on_book(book, &mut arbs).await,
                        None => break,
                    }
                }
                Some(result) = arbs.join_next(), if !arbs.is_empty() => {
                    match result {
                        Ok((approval, outcome)) => self.on_arb_complete(approval, outcome).await,
                        Err(err) => error!(%err, "arb task panicked"),
                    }
                }
            }
        }

        info!(in_flight = arbs.len(), "book feed closed, draining in-flight arbs");
        let deadline = Duration::from_millis(self.config.shutdown_deadline_ms);
        let drained = tokio::time::timeout(deadline, async {
            while let Some(result) = arbs.join_next().await {
                match result {
                    Ok((approval, outcome)) => self.on_arb_complete(approval, outcome).await,
                    Err(err) => error!(%err, "arb task panicked"),
                }
            }
        })
        .await;

        if drained.is_err() {
            error!("shutdown deadline elapsed with arbs still in flight");
        }
    }

    async fn on_book(&self, book: BookUpdate, arbs: &mut JoinSet<(Approval, ArbOutcome)>) {
        self.metrics.book_updates.fetch_add(1, Ordering::Relaxed);
        let key = (book.venue, book.market_id.clone());
        self.books
            .write()
            .expect("book view lock poisoned")
            .insert(key.clone(), book);

        if self.is_draining() {
            return;
        }

        let gas = self.gas.snapshot();
        let signals = {
            let books = self.books.read().expect("book view lock poisoned");
            self.scanner.on_book_update(&books, &key, &gas)
        };

        for signal in signals {
            self.metrics.signals.fetch_add(1, Ordering::Relaxed);

            if !self.config.enable_live_trading {
                info!(
                    pair = %signal.pair,
                    net_edge = %signal.net_edge,
                    max_qty = signal.max_qty,
                    "signal recorded (live trading disabled)"
                );
                continue;
            }

            let approval = {
                let mut state = self.state.lock().await;
                let RiskState { balances, legs } = &mut *state;
                self.risk.approve(&signal, &self.health, balances, legs)
            };

            match approval {
                Ok(approval) => {
                    self.metrics.approvals.fetch_add(1, Ordering::Relaxed);
                    let runner = self.runner.clone();
                    arbs.spawn(async move {
                        let outcome = runner.run(approval.clone()).await;
                        (approval, outcome)
                    });
                }
                Err(rejection) => {
                    self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(pair = %signal.pair, %rejection, "risk rejected signal");
                }
            }
        }
    }

    /// Terminal-state bookkeeping: open legs always release; capital is
    /// credited back on abort and on merge. Settled and closed-at-loss
    /// trades keep their capital deployed in positions until resolution.
    async fn on_arb_complete(&self, approval: Approval, outcome: ArbOutcome) {
        let markets = approval.signal.pair.markets();
        let release_capital = matches!(
            outcome.record.final_state,
            FinalState::Aborted | FinalState::Merged
        );

        {
            let mut state = self.state.lock().await;
            state.legs.release(&markets);
            if release_capital {
                for &(venue, amount) in &approval.reserved {
                    state.balances.release(venue, amount);
                }
            }
        }

        self.metrics.count_final(outcome.record.final_state);

        if let Err(err) = self.store.lock().await.append(&outcome.record) {
            error!(%err, id = %outcome.record.id, "failed to persist trade record");
        }
    }
}

/// Convenience: the key a published book indexes under.
pub fn book_key(book: &BookUpdate) -> (Venue, SmolStr) {
    (book.venue, book.market_id.clone())
}

//! Two-leg execution coordinator.
//!
//! One [`ArbRunner`] task owns each arb's [`LegState`] machine for its
//! lifetime; transitions are a pure function of `(state, event)` and every
//! venue error reduces to an event. Leg ordering puts the higher-certainty
//! leg second:
//!
//! - intra-Polymarket: both legs simultaneously as FOK;
//! - intra-Kalshi: both legs as aggressive limit orders, cancelled at the
//!   deadline (immediate-or-cancel semantics);
//! - cross-venue: Kalshi leg first, Polymarket FOK on confirmed fill.
//!
//! When both legs are Polymarket positions of one condition, the runner
//! invokes the CTF merge to realize the profit immediately; otherwise the
//! pair is held to cash settlement.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use dutchbook_execution::adapter::{
    Fill, KalshiOrderAdapter, OrderTicket, PolymarketOrderAdapter,
};
use dutchbook_execution::chain::ctf::{CtfMerger, MergeError};
use dutchbook_execution::chain::PolygonChain;
use dutchbook_execution::error::VenueError;
use dutchbook_instrument::{MarketKey, Venue};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::fees::FeeSchedule;
use crate::hedge::{HedgeOutcome, HedgeStrategy, Hedger};
use crate::ledger::{FinalState, LegFill, TradeRecord};
use crate::risk::Approval;
use crate::scan::BookView;

/// Lifecycle states of one in-flight arb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    Idle,
    Leg1Submitted,
    Leg1Filled,
    Leg2Submitted,
    BothFilled,
    HedgeNeeded,
    Aborted,
    Merged,
    ClosedAtLoss,
}

impl LegState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LegState::Aborted | LegState::Merged | LegState::ClosedAtLoss
        )
    }
}

/// Events driving the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegEvent {
    SubmitLeg1,
    /// Leg 1 fully filled, or a viable partial at the deadline.
    Leg1Filled { qty: u32 },
    /// Leg 1 rejected, zero-filled, timed out, or partial below the viable
    /// minimum.
    Leg1Dead,
    SubmitLeg2,
    Leg2Filled { qty: u32 },
    /// Leg 2 partial or rejected: the filled side needs a hedge.
    Leg2Unfilled { filled: u32 },
    /// Merge confirmed, or the pair settles in cash.
    Resolved,
    MergeFailed,
    /// Hedger acquired the missing leg.
    HedgeNeutral,
    HedgeFailed,
}

/// The transition table. Returns `None` for invalid `(state, event)` pairs.
pub fn transition(state: LegState, event: &LegEvent) -> Option<LegState> {
    use LegState as S;

    Some(match (state, event) {
        (S::Idle, LegEvent::SubmitLeg1) => S::Leg1Submitted,
        (S::Leg1Submitted, LegEvent::Leg1Filled { .. }) => S::Leg1Filled,
        (S::Leg1Submitted, LegEvent::Leg1Dead) => S::Aborted,
        (S::Leg1Filled, LegEvent::SubmitLeg2) => S::Leg2Submitted,
        (S::Leg2Submitted, LegEvent::Leg2Filled { .. }) => S::BothFilled,
        (S::Leg2Submitted, LegEvent::Leg2Unfilled { .. }) => S::HedgeNeeded,
        (S::BothFilled, LegEvent::Resolved) => S::Merged,
        (S::BothFilled, LegEvent::MergeFailed) => S::ClosedAtLoss,
        (S::HedgeNeeded, LegEvent::HedgeNeutral) => S::BothFilled,
        (S::HedgeNeeded, LegEvent::HedgeFailed) => S::ClosedAtLoss,
        _ => return None,
    })
}

/// Completed arb: the machine's terminal state plus the ledger record.
#[derive(Debug, Clone)]
pub struct ArbOutcome {
    pub state: LegState,
    pub record: TradeRecord,
}

/// Executes one approved arb to a terminal state.
pub struct ArbRunner<K, P, C> {
    kalshi: Arc<K>,
    polymarket: Arc<P>,
    merger: Arc<CtfMerger<C>>,
    config: EngineConfig,
    fees: FeeSchedule,
    books: Arc<std::sync::RwLock<BookView>>,
}

impl<K, P, C> ArbRunner<K, P, C>
where
    K: KalshiOrderAdapter,
    P: PolymarketOrderAdapter,
    C: PolygonChain,
{
    pub fn new(
        kalshi: Arc<K>,
        polymarket: Arc<P>,
        merger: Arc<CtfMerger<C>>,
        config: EngineConfig,
        fees: FeeSchedule,
        books: Arc<std::sync::RwLock<BookView>>,
    ) -> Self {
        Self {
            kalshi,
            polymarket,
            merger,
            config,
            fees,
            books,
        }
    }

    /// Drive the approval to a terminal state.
    pub async fn run(&self, approval: Approval) -> ArbOutcome {
        let pair = approval.signal.pair.clone();
        let shape = (pair.yes.venue, pair.no.venue);

        match shape {
            (Venue::Polymarket, Venue::Polymarket) => self.run_poly_pair(approval).await,
            (Venue::Kalshi, Venue::Kalshi) => self.run_kalshi_pair(approval).await,
            _ => self.run_cross(approval).await,
        }
    }

    /// Intra-Polymarket: both legs simultaneously as FOK, merge on success.
    async fn run_poly_pair(&self, approval: Approval) -> ArbOutcome {
        let signal = &approval.signal;
        let pair = &signal.pair;
        let qty = approval.qty;
        let timeout = Duration::from_millis(self.config.poly_leg_timeout_ms);

        let mut state = step(LegState::Idle, &LegEvent::SubmitLeg1);

        let yes_ticket = OrderTicket::new(
            pair.yes.market_id.clone(),
            pair.yes.outcome,
            signal.yes_limit,
            qty,
        );
        let no_ticket = OrderTicket::new(
            pair.no.market_id.clone(),
            pair.no.outcome,
            signal.no_limit,
            qty,
        );

        let (yes_fill, no_fill) = tokio::join!(
            self.poly_fok(&yes_ticket, timeout),
            self.poly_fok(&no_ticket, timeout),
        );

        let yes_leg = self.leg_fill(&pair.yes, &yes_fill, &pair.profile);
        let no_leg = self.leg_fill(&pair.no, &no_fill, &pair.profile);

        if yes_fill.filled_qty == 0 && no_fill.filled_qty == 0 {
            state = step(state, &LegEvent::Leg1Dead);
            return self.finish(state, yes_leg, no_leg, Decimal::ZERO, None, FinalState::Aborted);
        }

        state = step(state, &LegEvent::Leg1Filled { qty });
        state = step(state, &LegEvent::SubmitLeg2);

        if yes_fill.filled_qty == qty && no_fill.filled_qty == qty {
            state = step(state, &LegEvent::Leg2Filled { qty });
            return self.merge_and_finish(state, pair.yes.market_id.as_str(), yes_leg, no_leg, signal.gas_per_contract).await;
        }

        // Exactly one leg filled (FOK is all-or-nothing): hedge the other.
        state = step(state, &LegEvent::Leg2Unfilled {
            filled: yes_fill.filled_qty.min(no_fill.filled_qty),
        });
        let (filled_key, filled_leg, missing_key, missing_leg) =
            if yes_fill.filled_qty > 0 {
                (&pair.yes, yes_leg, &pair.no, no_leg)
            } else {
                (&pair.no, no_leg, &pair.yes, yes_leg)
            };

        self.hedge_and_finish(state, filled_key, filled_leg, missing_key, missing_leg, signal.gas_per_contract)
            .await
    }

    /// Intra-Kalshi: both legs as aggressive limit orders with a deadline.
    async fn run_kalshi_pair(&self, approval: Approval) -> ArbOutcome {
        let signal = &approval.signal;
        let pair = &signal.pair;
        let qty = approval.qty;
        let deadline = Duration::from_millis(self.config.kalshi_leg_timeout_ms);

        let mut state = step(LegState::Idle, &LegEvent::SubmitLeg1);

        let yes_ticket = OrderTicket::new(
            pair.yes.market_id.clone(),
            pair.yes.outcome,
            signal.yes_limit,
            qty,
        );
        let no_ticket = OrderTicket::new(
            pair.no.market_id.clone(),
            pair.no.outcome,
            signal.no_limit,
            qty,
        );

        let (yes_fill, no_fill) = tokio::join!(
            self.kalshi_limit(&yes_ticket, deadline),
            self.kalshi_limit(&no_ticket, deadline),
        );

        let yes_leg = self.leg_fill(&pair.yes, &yes_fill, &pair.profile);
        let no_leg = self.leg_fill(&pair.no, &no_fill, &pair.profile);
        let matched = yes_fill.filled_qty.min(no_fill.filled_qty);
        let larger = yes_fill.filled_qty.max(no_fill.filled_qty);

        if larger == 0 {
            state = step(state, &LegEvent::Leg1Dead);
            return self.finish(state, yes_leg, no_leg, Decimal::ZERO, None, FinalState::Aborted);
        }
        if larger < self.config.min_viable_qty {
            // A dust partial is aborted, not hedged.
            state = step(state, &LegEvent::Leg1Dead);
            return self.finish(state, yes_leg, no_leg, Decimal::ZERO, None, FinalState::Aborted);
        }

        state = step(state, &LegEvent::Leg1Filled { qty: larger });
        state = step(state, &LegEvent::SubmitLeg2);

        if yes_fill.filled_qty == no_fill.filled_qty {
            state = step(state, &LegEvent::Leg2Filled { qty: matched });
            state = step(state, &LegEvent::Resolved);
            // Cash settlement pays $1 per matched pair at resolution.
            return self.finish(state, yes_leg, no_leg, Decimal::ZERO, None, FinalState::Settled);
        }

        state = step(state, &LegEvent::Leg2Unfilled { filled: matched });
        let (filled_key, filled_leg, missing_key, missing_leg) =
            if yes_fill.filled_qty > no_fill.filled_qty {
                (&pair.yes, yes_leg, &pair.no, no_leg)
            } else {
                (&pair.no, no_leg, &pair.yes, yes_leg)
            };

        self.hedge_and_finish(state, filled_key, filled_leg, missing_key, missing_leg, Decimal::ZERO)
            .await
    }

    /// Cross-venue: Kalshi first (lower certainty), Polymarket FOK second.
    async fn run_cross(&self, approval: Approval) -> ArbOutcome {
        let signal = &approval.signal;
        let pair = &signal.pair;
        let qty = approval.qty;
        let deadline = Duration::from_millis(self.config.cross_leg_timeout_ms);
        let fok_timeout = Duration::from_millis(self.config.poly_leg_timeout_ms);

        // Identify which leg lives where.
        let (kalshi_key, kalshi_price, poly_key, poly_price) =
            if pair.yes.venue == Venue::Kalshi {
                (&pair.yes, signal.yes_limit, &pair.no, signal.no_limit)
            } else {
                (&pair.no, signal.no_limit, &pair.yes, signal.yes_limit)
            };

        let mut state = step(LegState::Idle, &LegEvent::SubmitLeg1);

        let kalshi_ticket = OrderTicket::new(
            kalshi_key.market_id.clone(),
            kalshi_key.outcome,
            kalshi_price,
            qty,
        );
        let kalshi_fill = self.kalshi_limit(&kalshi_ticket, deadline).await;
        let kalshi_leg = self.leg_fill(kalshi_key, &kalshi_fill, &pair.profile);

        if kalshi_fill.filled_qty < self.config.min_viable_qty {
            state = step(state, &LegEvent::Leg1Dead);
            let (yes_leg, no_leg) = order_legs(pair, kalshi_leg, LegFill::empty(poly_key.clone()));
            return self.finish(state, yes_leg, no_leg, Decimal::ZERO, None, FinalState::Aborted);
        }

        state = step(state, &LegEvent::Leg1Filled { qty: kalshi_fill.filled_qty });
        state = step(state, &LegEvent::SubmitLeg2);

        // Shrink leg 2 to the confirmed leg 1 quantity.
        let poly_ticket = OrderTicket::new(
            poly_key.market_id.clone(),
            poly_key.outcome,
            poly_price,
            kalshi_fill.filled_qty,
        );
        let poly_fill = self.poly_fok(&poly_ticket, fok_timeout).await;
        let poly_leg = self.leg_fill(poly_key, &poly_fill, &pair.profile);

        if poly_fill.filled_qty == kalshi_fill.filled_qty {
            state = step(state, &LegEvent::Leg2Filled { qty: poly_fill.filled_qty });
            state = step(state, &LegEvent::Resolved);
            let (yes_leg, no_leg) = order_legs(pair, kalshi_leg, poly_leg);
            // Legs live on different venues: held to resolution.
            return self.finish(
                state,
                yes_leg,
                no_leg,
                signal.gas_per_contract,
                None,
                FinalState::Settled,
            );
        }

        state = step(state, &LegEvent::Leg2Unfilled { filled: poly_fill.filled_qty });
        self.hedge_and_finish(
            state,
            kalshi_key,
            kalshi_leg,
            poly_key,
            poly_leg,
            signal.gas_per_contract,
        )
        .await
    }

    /// FOK with the configured response deadline.
    async fn poly_fok(&self, ticket: &OrderTicket, deadline: Duration) -> Fill {
        match tokio::time::timeout(deadline, self.polymarket.place_fok(ticket)).await {
            Ok(Ok(fill)) => fill,
            Ok(Err(err)) => {
                self.log_leg_error(&err, "polymarket FOK failed");
                Fill {
                    order_id: smol_str::SmolStr::new("failed"),
                    filled_qty: 0,
                    avg_price: Decimal::ZERO,
                }
            }
            Err(_) => {
                warn!(market = %ticket.market_id, "polymarket FOK timed out, treating as expired");
                Fill {
                    order_id: smol_str::SmolStr::new("expired"),
                    filled_qty: 0,
                    avg_price: Decimal::ZERO,
                }
            }
        }
    }

    /// Aggressive limit with a deadline: place (retrying transient errors up
    /// to three attempts), poll fills, cancel the remainder at the deadline.
    async fn kalshi_limit(&self, ticket: &OrderTicket, deadline: Duration) -> Fill {
        const POLL: Duration = Duration::from_millis(100);
        const PLACE_ATTEMPTS: u32 = 3;

        let mut ack = None;
        let mut backoff = Duration::from_millis(50);
        for attempt in 1..=PLACE_ATTEMPTS {
            match self.kalshi.place_limit(ticket).await {
                Ok(acked) => {
                    ack = Some(acked);
                    break;
                }
                Err(err) if err.is_transient() && attempt < PLACE_ATTEMPTS => {
                    warn!(%err, attempt, "kalshi placement retry");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    self.log_leg_error(&err, "kalshi placement failed");
                    break;
                }
            }
        }
        let Some(ack) = ack else {
            return Fill {
                order_id: smol_str::SmolStr::new("failed"),
                filled_qty: 0,
                avg_price: Decimal::ZERO,
            };
        };

        if ack.filled_qty >= ticket.qty {
            return Fill {
                order_id: ack.order_id,
                filled_qty: ticket.qty,
                avg_price: ticket.price,
            };
        }

        let expiry = tokio::time::Instant::now() + deadline;
        let mut avg_price = ticket.price;
        while tokio::time::Instant::now() < expiry {
            tokio::time::sleep(POLL).await;
            match self.kalshi.order_status(&ack.order_id).await {
                Ok(status) => {
                    if let Some(price) = status.avg_price {
                        avg_price = price;
                    }
                    if status.filled_qty >= ticket.qty || !status.open {
                        return Fill {
                            order_id: ack.order_id,
                            filled_qty: status.filled_qty.min(ticket.qty),
                            avg_price,
                        };
                    }
                }
                Err(err) => warn!(%err, "kalshi status poll failed"),
            }
        }

        // Deadline: cancel and keep whatever filled.
        let filled = match self.kalshi.cancel(&ack.order_id).await {
            Ok(filled) => filled,
            Err(err) => {
                warn!(%err, "kalshi cancel at deadline failed");
                ack.filled_qty
            }
        };
        Fill {
            order_id: ack.order_id,
            filled_qty: filled.min(ticket.qty),
            avg_price,
        }
    }

    /// Hedge the missing leg, then resolve the pair.
    async fn hedge_and_finish(
        &self,
        state: LegState,
        filled_key: &MarketKey,
        filled_leg: LegFill,
        missing_key: &MarketKey,
        mut missing_leg: LegFill,
        gas_per_contract: Decimal,
    ) -> ArbOutcome {
        let pair = order_pair_of(filled_key, missing_key);
        let unhedged = filled_leg.qty.saturating_sub(missing_leg.qty);

        let book = self
            .books
            .read()
            .expect("book view lock poisoned")
            .get(&missing_key.market())
            .cloned();

        let outcome = match book {
            Some(book) => {
                let hedger = Hedger::new(&*self.kalshi, &*self.polymarket, &self.config);
                hedger
                    .hedge(
                        missing_key,
                        unhedged,
                        filled_leg.avg_price,
                        &book,
                        HedgeStrategy::Chase,
                    )
                    .await
            }
            None => {
                warn!(market = %missing_key, "no book available for hedge");
                HedgeOutcome::Failed {
                    hedged_qty: 0,
                    avg_price: Decimal::ZERO,
                    unhedged,
                }
            }
        };

        // Fold the hedge fills into the missing leg.
        let hedged = outcome.hedged_qty();
        if hedged > 0 {
            let prior_cost = missing_leg.cost();
            let hedge_cost = outcome.avg_price() * Decimal::from(hedged);
            missing_leg.qty += hedged;
            missing_leg.avg_price =
                (prior_cost + hedge_cost) / Decimal::from(missing_leg.qty);
        }

        match outcome {
            HedgeOutcome::Neutralized { .. } => {
                let state = step(state, &LegEvent::HedgeNeutral);
                let both_poly = filled_key.venue == Venue::Polymarket
                    && missing_key.venue == Venue::Polymarket;
                let (yes_leg, no_leg) = order_fills(filled_key, filled_leg, missing_leg);
                if both_poly {
                    self.merge_and_finish(state, filled_key.market_id.as_str(), yes_leg, no_leg, gas_per_contract)
                        .await
                } else {
                    let state = step(state, &LegEvent::Resolved);
                    self.finish(state, yes_leg, no_leg, gas_per_contract, None, FinalState::Settled)
                }
            }
            HedgeOutcome::Failed { unhedged, .. } => {
                error!(
                    pair = %pair,
                    unhedged,
                    "hedge failed, retaining orphan leg for manual intervention"
                );
                let state = step(state, &LegEvent::HedgeFailed);
                let (yes_leg, no_leg) = order_fills(filled_key, filled_leg, missing_leg);
                self.finish(state, yes_leg, no_leg, gas_per_contract, None, FinalState::ClosedAtLoss)
            }
        }
    }

    /// Merge both Polymarket legs of one condition and finish.
    async fn merge_and_finish(
        &self,
        state: LegState,
        condition_id: &str,
        yes_leg: LegFill,
        no_leg: LegFill,
        gas_per_contract: Decimal,
    ) -> ArbOutcome {
        let matched = yes_leg.qty.min(no_leg.qty) as u64;
        let condition = match parse_condition_id(condition_id) {
            Ok(condition) => condition,
            Err(err) => {
                error!(%err, condition_id, "unmergeable condition id");
                let state = step(state, &LegEvent::MergeFailed);
                return self.finish(
                    state,
                    yes_leg,
                    no_leg,
                    gas_per_contract,
                    None,
                    FinalState::ClosedAtLoss,
                );
            }
        };

        match self.merger.merge(condition, matched).await {
            Ok(receipt) => {
                let state = step(state, &LegEvent::Resolved);
                info!(tx = %receipt.tx_hash, attempts = receipt.attempts, "arb merged");
                self.finish(
                    state,
                    yes_leg,
                    no_leg,
                    gas_per_contract,
                    Some(format!("{:#x}", receipt.tx_hash)),
                    FinalState::Merged,
                )
            }
            Err(MergeError::Chain(err)) => {
                error!(%err, "merge infrastructure failure, positions retained");
                let state = step(state, &LegEvent::MergeFailed);
                self.finish(state, yes_leg, no_leg, gas_per_contract, None, FinalState::ClosedAtLoss)
            }
            Err(err) => {
                error!(%err, "merge failed after retries, positions retained");
                let state = step(state, &LegEvent::MergeFailed);
                self.finish(state, yes_leg, no_leg, gas_per_contract, None, FinalState::ClosedAtLoss)
            }
        }
    }

    fn finish(
        &self,
        state: LegState,
        yes_leg: LegFill,
        no_leg: LegFill,
        gas_per_contract: Decimal,
        merge_tx: Option<String>,
        final_state: FinalState,
    ) -> ArbOutcome {
        let matched = yes_leg.qty.min(no_leg.qty);
        let gas = gas_per_contract * Decimal::from(matched);
        let record = TradeRecord::new(yes_leg, no_leg, gas, merge_tx, final_state);
        info!(
            id = %record.id,
            ?final_state,
            pnl = %record.realized_pnl,
            "arb complete"
        );
        ArbOutcome { state, record }
    }

    fn leg_fill(
        &self,
        key: &MarketKey,
        fill: &Fill,
        profile: &dutchbook_instrument::MarketProfile,
    ) -> LegFill {
        let fees = match key.venue {
            Venue::Kalshi => self.fees.kalshi_taker_fee(fill.avg_price, fill.filled_qty),
            Venue::Polymarket => {
                self.fees
                    .polymarket_taker_fee(fill.avg_price, fill.filled_qty, profile)
            }
        };
        LegFill::new(key.clone(), fill.filled_qty, fill.avg_price, fees)
    }

    fn log_leg_error(&self, err: &VenueError, context: &str) {
        if err.is_auth() {
            error!(%err, "{context}: venue authentication failure");
        } else {
            warn!(%err, "{context}");
        }
    }
}

/// Apply one event, logging (and holding position) on an invalid pair.
fn step(state: LegState, event: &LegEvent) -> LegState {
    match transition(state, event) {
        Some(next) => next,
        None => {
            warn!(?state, ?event, "invalid leg transition ignored");
            state
        }
    }
}

/// Arrange (filled, missing) fills into (yes, no) order.
fn order_fills(filled_key: &MarketKey, filled: LegFill, missing: LegFill) -> (LegFill, LegFill) {
    match filled_key.outcome {
        dutchbook_instrument::Outcome::Yes => (filled, missing),
        dutchbook_instrument::Outcome::No => (missing, filled),
    }
}

/// Arrange (kalshi, poly) fills into (yes, no) order for a cross pair.
fn order_legs(
    pair: &crate::pairs::MarketPair,
    kalshi_leg: LegFill,
    poly_leg: LegFill,
) -> (LegFill, LegFill) {
    if pair.yes.venue == Venue::Kalshi {
        (kalshi_leg, poly_leg)
    } else {
        (poly_leg, kalshi_leg)
    }
}

fn order_pair_of(a: &MarketKey, b: &MarketKey) -> String {
    format!("{a} / {b}")
}

/// Condition ids are 32-byte hex strings.
fn parse_condition_id(condition_id: &str) -> Result<B256, String> {
    let hex_digits = condition_id.strip_prefix("0x").unwrap_or(condition_id);
    let bytes = hex::decode(hex_digits).map_err(|e| e.to_string())?;
    if bytes.len() != 32 {
        return Err(format!("expected 32 bytes, got {}", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

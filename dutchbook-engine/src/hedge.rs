//! The hedger: neutralize a filled leg whose counterpart did not fill.
//!
//! Invoked only from `HEDGE_NEEDED` with the missing leg's market, outcome
//! and quantity. Two strategies:
//!
//! - **Chase**: cross the spread with successive IOC orders stepping down
//!   the ask ladder, bounded by the max acceptable price
//!   `1.00 - leg1_cost - max_hedge_loss_per_contract`.
//! - **Fade**: work the target price patiently with periodic IOC attempts
//!   at the best ask; if the window expires unfilled, escalate to chase.
//!
//! If the budget cannot neutralize the position, the remainder is retained
//! and escalated; the hedger takes no further action.

use std::time::Duration;

use dutchbook_data::books::MarketBook;
use dutchbook_execution::adapter::{
    Fill, KalshiOrderAdapter, OrderTicket, PolymarketOrderAdapter,
};
use dutchbook_instrument::{MarketKey, Outcome, Venue};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::EngineConfig;

/// How patiently to work the missing leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeStrategy {
    Chase,
    Fade,
}

/// Terminal hedge outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HedgeOutcome {
    /// The missing leg was fully acquired.
    Neutralized { qty: u32, avg_price: Decimal },
    /// Budget exhausted; `unhedged` contracts remain exposed.
    Failed {
        hedged_qty: u32,
        avg_price: Decimal,
        unhedged: u32,
    },
}

impl HedgeOutcome {
    pub fn hedged_qty(&self) -> u32 {
        match self {
            HedgeOutcome::Neutralized { qty, .. } => *qty,
            HedgeOutcome::Failed { hedged_qty, .. } => *hedged_qty,
        }
    }

    pub fn avg_price(&self) -> Decimal {
        match self {
            HedgeOutcome::Neutralized { avg_price, .. } => *avg_price,
            HedgeOutcome::Failed { avg_price, .. } => *avg_price,
        }
    }
}

/// Fade re-attempt cadence.
const FADE_POLL: Duration = Duration::from_millis(500);
/// Kalshi IOC emulation: how long an aggressive limit may rest before the
/// remainder is cancelled.
const KALSHI_IOC_WINDOW: Duration = Duration::from_millis(250);

pub struct Hedger<'a, K, P> {
    kalshi: &'a K,
    polymarket: &'a P,
    config: &'a EngineConfig,
}

impl<'a, K, P> Hedger<'a, K, P>
where
    K: KalshiOrderAdapter,
    P: PolymarketOrderAdapter,
{
    pub fn new(kalshi: &'a K, polymarket: &'a P, config: &'a EngineConfig) -> Self {
        Self {
            kalshi,
            polymarket,
            config,
        }
    }

    /// Acquire `qty` of the missing leg without paying more than the hedge
    /// budget allows.
    ///
    /// `leg1_cost` is the filled leg's average price; the price ceiling is
    /// `1.00 - leg1_cost - max_hedge_loss_per_contract`.
    pub async fn hedge(
        &self,
        missing: &MarketKey,
        qty: u32,
        leg1_cost: Decimal,
        book: &MarketBook,
        strategy: HedgeStrategy,
    ) -> HedgeOutcome {
        let ceiling = Decimal::ONE - leg1_cost - self.config.max_hedge_loss_per_contract;
        info!(
            market = %missing,
            qty,
            %ceiling,
            ?strategy,
            "hedging missing leg"
        );

        let mut filled = 0u32;
        let mut cost = Decimal::ZERO;

        if strategy == HedgeStrategy::Fade {
            let (fade_filled, fade_cost) = self.fade(missing, qty, ceiling, book).await;
            filled += fade_filled;
            cost += fade_cost;
        }

        if filled < qty {
            let (chase_filled, chase_cost) =
                self.chase(missing, qty - filled, ceiling, book).await;
            filled += chase_filled;
            cost += chase_cost;
        }

        let avg_price = if filled > 0 {
            cost / Decimal::from(filled)
        } else {
            Decimal::ZERO
        };

        if filled >= qty {
            HedgeOutcome::Neutralized { qty: filled, avg_price }
        } else {
            warn!(
                market = %missing,
                filled,
                unhedged = qty - filled,
                "hedge budget exhausted, retaining position"
            );
            HedgeOutcome::Failed {
                hedged_qty: filled,
                avg_price,
                unhedged: qty - filled,
            }
        }
    }

    /// Step through ask levels at or below the ceiling with IOC orders.
    async fn chase(
        &self,
        missing: &MarketKey,
        qty: u32,
        ceiling: Decimal,
        book: &MarketBook,
    ) -> (u32, Decimal) {
        let levels = match missing.outcome {
            Outcome::Yes => book.yes_asks.levels(),
            Outcome::No => book.no_asks.levels(),
        };

        let mut remaining = qty;
        let mut cost = Decimal::ZERO;

        for level in levels {
            if remaining == 0 {
                break;
            }
            if level.price > ceiling {
                break;
            }
            let ticket = OrderTicket::new(
                missing.market_id.clone(),
                missing.outcome,
                level.price,
                remaining,
            );
            let fill = self.buy_ioc(missing.venue, &ticket).await;
            remaining -= fill.filled_qty.min(remaining);
            cost += fill.avg_price * Decimal::from(fill.filled_qty);
        }

        (qty - remaining, cost)
    }

    /// Patiently retry at the best ask inside the fade window.
    async fn fade(
        &self,
        missing: &MarketKey,
        qty: u32,
        ceiling: Decimal,
        book: &MarketBook,
    ) -> (u32, Decimal) {
        let best = match missing.outcome {
            Outcome::Yes => book.best_yes_ask(),
            Outcome::No => book.best_no_ask(),
        };
        let Some(best) = best else { return (0, Decimal::ZERO) };
        let target = best.price.min(ceiling);
        if target <= Decimal::ZERO {
            return (0, Decimal::ZERO);
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.hedge_timeout_ms);
        let mut remaining = qty;
        let mut cost = Decimal::ZERO;

        while remaining > 0 && tokio::time::Instant::now() < deadline {
            let ticket = OrderTicket::new(
                missing.market_id.clone(),
                missing.outcome,
                target,
                remaining,
            );
            let fill = self.buy_ioc(missing.venue, &ticket).await;
            remaining -= fill.filled_qty.min(remaining);
            cost += fill.avg_price * Decimal::from(fill.filled_qty);
            if remaining > 0 {
                tokio::time::sleep(FADE_POLL).await;
            }
        }

        (qty - remaining, cost)
    }

    /// IOC on the missing leg's venue. Polymarket supports fill-and-kill
    /// natively; Kalshi is emulated with an aggressive limit that is
    /// cancelled after a short resting window.
    async fn buy_ioc(&self, venue: Venue, ticket: &OrderTicket) -> Fill {
        match venue {
            Venue::Polymarket => match self.polymarket.place_ioc(ticket).await {
                Ok(fill) => fill,
                Err(err) => {
                    warn!(%err, "hedge IOC failed");
                    zero_fill()
                }
            },
            Venue::Kalshi => {
                let ack = match self.kalshi.place_limit(ticket).await {
                    Ok(ack) => ack,
                    Err(err) => {
                        warn!(%err, "hedge limit placement failed");
                        return zero_fill();
                    }
                };
                if ack.filled_qty >= ticket.qty {
                    return Fill {
                        order_id: ack.order_id,
                        filled_qty: ack.filled_qty,
                        avg_price: ticket.price,
                    };
                }
                tokio::time::sleep(KALSHI_IOC_WINDOW).await;
                let filled = match self.kalshi.cancel(&ack.order_id).await {
                    Ok(filled) => filled,
                    Err(err) => {
                        warn!(%err, "hedge cancel failed, using acked fill");
                        ack.filled_qty
                    }
                };
                Fill {
                    order_id: ack.order_id,
                    filled_qty: filled,
                    avg_price: ticket.price,
                }
            }
        }
    }
}

fn zero_fill() -> Fill {
    Fill {
        order_id: smol_str::SmolStr::new("none"),
        filled_qty: 0,
        avg_price: Decimal::ZERO,
    }
}

//! Trade records, positions, and the append-only trade log.
//!
//! A [`TradeRecord`] captures one completed arb: both leg fills, realized
//! costs, the merge transaction if any, and the realized PnL. The log is
//! append-only; replaying it reproduces positions and PnL exactly, which is
//! the recovery path after a restart.

use chrono::{DateTime, Utc};
use dutchbook_instrument::MarketKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Terminal disposition of an arb.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    /// No meaningful fill; capital released.
    Aborted,
    /// Both legs filled on a venue that settles in cash; positions are held
    /// to resolution for the guaranteed $1 payout.
    Settled,
    /// Both legs filled and merged on-chain; profit realized immediately.
    Merged,
    /// Hedging failed within budget; position retained, escalated.
    ClosedAtLoss,
}

/// One leg's realized fill.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct LegFill {
    pub market: MarketKey,
    pub qty: u32,
    pub avg_price: Decimal,
    pub fees: Decimal,
}

impl LegFill {
    pub fn new(market: MarketKey, qty: u32, avg_price: Decimal, fees: Decimal) -> Self {
        Self {
            market,
            qty,
            avg_price,
            fees,
        }
    }

    pub fn empty(market: MarketKey) -> Self {
        Self {
            market,
            qty: 0,
            avg_price: Decimal::ZERO,
            fees: Decimal::ZERO,
        }
    }

    pub fn cost(&self) -> Decimal {
        self.avg_price * Decimal::from(self.qty)
    }
}

/// Append-only record of one arb.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct TradeRecord {
    pub id: SmolStr,
    pub yes: LegFill,
    pub no: LegFill,
    pub gas: Decimal,
    pub merge_tx: Option<String>,
    pub final_state: FinalState,
    pub realized_pnl: Decimal,
    pub ts: DateTime<Utc>,
}

impl TradeRecord {
    /// Build a record, deriving realized PnL from the matched pair count:
    /// `matched * (1.00 - yes_avg - no_avg) - fees - gas`.
    ///
    /// Unmatched contracts are retained positions, not realized PnL.
    pub fn new(
        yes: LegFill,
        no: LegFill,
        gas: Decimal,
        merge_tx: Option<String>,
        final_state: FinalState,
    ) -> Self {
        let matched = yes.qty.min(no.qty);
        let realized_pnl = if matched > 0 {
            Decimal::from(matched) * (Decimal::ONE - yes.avg_price - no.avg_price)
                - yes.fees
                - no.fees
                - gas
        } else {
            -yes.fees - no.fees - gas
        };

        Self {
            id: SmolStr::new(uuid::Uuid::new_v4().to_string()),
            yes,
            no,
            gas,
            merge_tx,
            final_state,
            realized_pnl,
            ts: Utc::now(),
        }
    }

    pub fn matched_qty(&self) -> u32 {
        self.yes.qty.min(self.no.qty)
    }
}

/// A live holding on one outcome ladder.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Position {
    pub market: MarketKey,
    pub qty: u32,
    pub avg_cost: Decimal,
    pub acquired_ts: DateTime<Utc>,
}

/// Current positions, derived from fills and merges.
#[derive(Clone, Debug, Default)]
pub struct PositionBook {
    positions: HashMap<MarketKey, Position>,
}

impl PositionBook {
    pub fn apply_fill(&mut self, market: &MarketKey, qty: u32, price: Decimal, ts: DateTime<Utc>) {
        if qty == 0 {
            return;
        }
        match self.positions.get_mut(market) {
            Some(position) => {
                let old_cost = position.avg_cost * Decimal::from(position.qty);
                let add_cost = price * Decimal::from(qty);
                position.qty += qty;
                position.avg_cost = (old_cost + add_cost) / Decimal::from(position.qty);
            }
            None => {
                self.positions.insert(
                    market.clone(),
                    Position {
                        market: market.clone(),
                        qty,
                        avg_cost: price,
                        acquired_ts: ts,
                    },
                );
            }
        }
    }

    /// Remove quantity on merge or settlement; drops the entry at zero.
    pub fn reduce(&mut self, market: &MarketKey, qty: u32) {
        if let Some(position) = self.positions.get_mut(market) {
            position.qty = position.qty.saturating_sub(qty);
            if position.qty == 0 {
                self.positions.remove(market);
            }
        }
    }

    pub fn get(&self, market: &MarketKey) -> Option<&Position> {
        self.positions.get(market)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Rebuild positions and cumulative realized PnL from the trade log.
    pub fn replay(records: &[TradeRecord]) -> (Self, Decimal) {
        let mut book = Self::default();
        let mut pnl = Decimal::ZERO;

        for record in records {
            book.apply_fill(&record.yes.market, record.yes.qty, record.yes.avg_price, record.ts);
            book.apply_fill(&record.no.market, record.no.qty, record.no.avg_price, record.ts);

            if record.final_state == FinalState::Merged {
                let matched = record.matched_qty();
                book.reduce(&record.yes.market, matched);
                book.reduce(&record.no.market, matched);
            }
            pnl += record.realized_pnl;
        }

        (book, pnl)
    }
}

/// Sink for completed trade records. The shipped implementation appends
/// JSON lines; a database-backed store is an external adapter.
pub trait TradeStore: Send {
    fn append(&mut self, record: &TradeRecord) -> std::io::Result<()>;
}

/// JSON-lines trade log on disk.
pub struct JsonlTradeStore {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl JsonlTradeStore {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full log back for replay.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Vec<TradeRecord>> {
        let file = File::open(path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            records.push(record);
        }
        Ok(records)
    }
}

impl TradeStore for JsonlTradeStore {
    fn append(&mut self, record: &TradeRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// No-op store for dry runs and tests.
#[derive(Debug, Default)]
pub struct NullTradeStore;

impl TradeStore for NullTradeStore {
    fn append(&mut self, _record: &TradeRecord) -> std::io::Result<()> {
        Ok(())
    }
}

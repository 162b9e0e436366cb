//! Gas cost oracle.
//!
//! The strategy prices Polymarket legs against an estimated per-transaction
//! gas cost expressed in USDC. Live estimation (gas price feed, MATIC/USDC
//! conversion) is an external adapter; the engine consumes snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A point-in-time gas cost estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSnapshot {
    /// Estimated cost of one split/merge/trade transaction, in USDC.
    pub per_tx_usdc: Decimal,
    pub at: DateTime<Utc>,
}

/// Source of gas cost snapshots.
pub trait GasOracle: Send + Sync {
    fn snapshot(&self) -> GasSnapshot;
}

/// Fixed-quote oracle, used in tests and as a conservative fallback.
#[derive(Debug, Clone, Copy)]
pub struct FixedGasOracle {
    per_tx_usdc: Decimal,
}

impl FixedGasOracle {
    pub fn new(per_tx_usdc: Decimal) -> Self {
        Self { per_tx_usdc }
    }
}

impl GasOracle for FixedGasOracle {
    fn snapshot(&self) -> GasSnapshot {
        GasSnapshot {
            per_tx_usdc: self.per_tx_usdc,
            at: Utc::now(),
        }
    }
}

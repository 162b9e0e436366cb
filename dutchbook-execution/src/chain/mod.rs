//! Polygon chain seam.
//!
//! The engine never talks to an RPC node directly; it speaks this trait.
//! Implementations (and their retry/connection management) live outside the
//! core. Tests drive the merge path with an in-memory chain.

pub mod ctf;

use std::future::Future;

use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Transaction hash.
pub type TxHash = B256;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Underpriced gas, nonce race, transport hiccup. Retryable.
    #[error("transient chain error: {0}")]
    Transient(String),
    /// Revert or other permanent failure.
    #[error("chain call failed: {0}")]
    Fatal(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

/// A raw call ready for submission.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub to: Address,
    pub calldata: Vec<u8>,
    pub nonce: u64,
    pub gas_limit: u64,
}

/// Receipt state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Mined and successful.
    Confirmed { block: u64 },
    /// Mined and reverted.
    Failed,
    /// Unknown to the node. A previously confirmed hash turning `Missing`
    /// means the block was reorged out.
    Missing,
}

/// Minimal Polygon access the merge path needs.
pub trait PolygonChain: Send + Sync {
    /// Submit a signed call; returns the transaction hash.
    fn send(&self, tx: TxRequest) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    /// Look up a receipt.
    fn receipt(
        &self,
        tx: &TxHash,
    ) -> impl Future<Output = Result<ReceiptStatus, ChainError>> + Send;

    /// Fresh gas limit estimate for a call.
    fn estimate_gas(
        &self,
        to: Address,
        calldata: &[u8],
    ) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Pending-state nonce for the signer account.
    fn pending_nonce(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Whether `operator` may move the signer's CTF outcome tokens.
    fn is_ctf_approved(
        &self,
        operator: Address,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Mergeable pairs held for a condition: the minimum of the Yes and No
    /// outcome token balances, in 6-decimal units.
    fn mergeable_balance(
        &self,
        condition_id: B256,
    ) -> impl Future<Output = Result<u64, ChainError>> + Send;
}

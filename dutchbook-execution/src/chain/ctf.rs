//! CTF `mergePositions` client.
//!
//! Merging burns equal amounts of Yes and No outcome tokens and returns one
//! unit of collateral per pair, realizing the arbitrage profit immediately
//! instead of waiting for resolution.
//!
//! ```text
//! CTF.mergePositions(IERC20 collateralToken, bytes32 parentCollectionId,
//!                    bytes32 conditionId, uint256[] partition, uint256 amount)
//! ```
//!
//! For Polymarket binary markets: parent collection id is 32 zero bytes,
//! partition is `[1, 2]` (index set per outcome), amounts are 6-decimal
//! USDC units.

use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolCall};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ChainError, PolygonChain, ReceiptStatus, TxHash, TxRequest};

/// Conditional Tokens Framework contract on Polygon mainnet.
pub const CTF_ADDRESS: &str = "0x4D97DcD97Ec945F40CF65F87097aCe5EA0476045";

/// USDC.e on Polygon, the collateral token for Polymarket markets.
pub const USDC_E_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// One outcome token in raw units (6 decimals).
pub const UNIT_SCALE: u64 = 1_000_000;

const RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECEIPT_POLL_ATTEMPTS: u32 = 60;

sol! {
    function mergePositions(
        address collateralToken,
        bytes32 parentCollectionId,
        bytes32 conditionId,
        uint256[] partition,
        uint256 amount
    );
}

#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error("merge failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("merge transaction reverted: {0}")]
    Reverted(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Result of a completed merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReceipt {
    pub tx_hash: TxHash,
    pub attempts: u32,
    /// True when a prior attempt had already merged the pair (idempotent
    /// retry observed via the outcome token balance).
    pub already_merged: bool,
}

/// Strict-submission-order nonce allocation for the Polygon signer.
///
/// A failed submission must hand its nonce back so the next transaction does
/// not strand behind a gap; a nonce that is no longer the newest is left
/// reserved and logged.
#[derive(Debug)]
pub struct NonceManager {
    next: Mutex<u64>,
}

impl NonceManager {
    pub fn new(start: u64) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }

    pub async fn allocate(&self) -> u64 {
        let mut next = self.next.lock().await;
        let nonce = *next;
        *next += 1;
        debug!(nonce, "nonce allocated");
        nonce
    }

    pub async fn release(&self, nonce: u64) {
        let mut next = self.next.lock().await;
        if nonce + 1 == *next {
            *next = nonce;
            debug!(nonce, "nonce released");
        } else {
            warn!(nonce, next = *next, "nonce gap reserved after failed submission");
        }
    }

    /// Re-anchor to the chain's pending nonce (startup / recovery).
    pub async fn reset(&self, pending: u64) {
        *self.next.lock().await = pending;
    }
}

/// Builds the `mergePositions` calldata for a condition and pair count.
pub fn merge_calldata(condition_id: B256, pairs: u64) -> Vec<u8> {
    let collateral: Address = USDC_E_ADDRESS.parse().expect("static address");
    mergePositionsCall {
        collateralToken: collateral,
        parentCollectionId: B256::ZERO,
        conditionId: condition_id,
        partition: vec![U256::from(1u8), U256::from(2u8)],
        amount: U256::from(pairs) * U256::from(UNIT_SCALE),
    }
    .abi_encode()
}

/// The merge client: nonce-tracked submission with bounded retries and
/// reorg detection.
pub struct CtfMerger<C> {
    chain: C,
    nonces: NonceManager,
    ctf: Address,
    max_retries: u32,
}

impl<C: PolygonChain> CtfMerger<C> {
    pub fn new(chain: C, max_retries: u32) -> Self {
        Self {
            chain,
            nonces: NonceManager::new(0),
            ctf: CTF_ADDRESS.parse().expect("static address"),
            max_retries,
        }
    }

    /// Anchor the nonce counter to the chain before first use.
    pub async fn sync_nonce(&self) -> Result<(), ChainError> {
        let pending = self.chain.pending_nonce().await?;
        self.nonces.reset(pending).await;
        Ok(())
    }

    /// Verify the CTF contract may move our outcome tokens.
    ///
    /// Approval is a one-time account setup step; refusing to merge without
    /// it is safer than submitting a transaction that will revert.
    pub async fn ensure_approved(&self, exchange: Address) -> Result<(), MergeError> {
        if self.chain.is_ctf_approved(exchange).await? {
            Ok(())
        } else {
            Err(MergeError::Reverted(format!(
                "CTF exchange {exchange} lacks ERC-1155 approval; run account setup"
            )))
        }
    }

    /// Merge `pairs` Yes+No pairs for `condition_id` back into collateral.
    ///
    /// Retries transient failures with exponential backoff and fresh gas, up
    /// to the configured limit. Idempotent: if a prior attempt (or a
    /// reorged-then-replayed one) already burned the pair, the balance check
    /// reports success instead of double-merging.
    pub async fn merge(&self, condition_id: B256, pairs: u64) -> Result<MergeReceipt, MergeError> {
        let mut last_error = String::from("no attempts made");
        let mut backoff = RETRY_BACKOFF_INITIAL;
        let mut last_hash = TxHash::ZERO;

        for attempt in 1..=self.max_retries {
            // On retries, a previous attempt may have landed even though we
            // saw an error: a burned pair balance means the merge is done.
            // The check is skipped on the first attempt, where a short
            // balance only means CLOB settlement has not landed yet.
            if attempt > 1 {
                let mergeable = self.chain.mergeable_balance(condition_id).await?;
                if mergeable < pairs * UNIT_SCALE {
                    info!(%condition_id, attempt, "merge already settled on-chain");
                    return Ok(MergeReceipt {
                        tx_hash: last_hash,
                        attempts: attempt,
                        already_merged: true,
                    });
                }
            }

            match self.attempt_merge(condition_id, pairs).await {
                Ok(tx_hash) => {
                    last_hash = tx_hash;
                    match self.await_receipt(&tx_hash).await? {
                        ReceiptStatus::Confirmed { block } => {
                            // Reorg check: the receipt must still exist on a
                            // second look. A vanished receipt retriggers the
                            // merge with fresh nonce and gas.
                            if let ReceiptStatus::Missing = self.chain.receipt(&tx_hash).await? {
                                warn!(%tx_hash, block, "merge receipt vanished (reorg), retrying");
                                last_error = "receipt reorged out".to_string();
                            } else {
                                info!(%tx_hash, block, attempt, pairs, "merge confirmed");
                                return Ok(MergeReceipt {
                                    tx_hash,
                                    attempts: attempt,
                                    already_merged: false,
                                });
                            }
                        }
                        ReceiptStatus::Failed => {
                            return Err(MergeError::Reverted(format!("{tx_hash}")));
                        }
                        ReceiptStatus::Missing => {
                            warn!(%tx_hash, attempt, "merge never mined, retrying");
                            last_error = "transaction not mined".to_string();
                        }
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(%err, attempt, "merge submission failed, retrying");
                    last_error = err.to_string();
                }
                Err(err) => return Err(MergeError::Chain(err)),
            }

            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        Err(MergeError::Exhausted {
            attempts: self.max_retries,
            last_error,
        })
    }

    async fn attempt_merge(&self, condition_id: B256, pairs: u64) -> Result<TxHash, ChainError> {
        let calldata = merge_calldata(condition_id, pairs);
        let gas_limit = self.chain.estimate_gas(self.ctf, &calldata).await?;
        let nonce = self.nonces.allocate().await;

        let result = self
            .chain
            .send(TxRequest {
                to: self.ctf,
                calldata,
                nonce,
                gas_limit,
            })
            .await;

        if result.is_err() {
            self.nonces.release(nonce).await;
        }
        result
    }

    async fn await_receipt(&self, tx_hash: &TxHash) -> Result<ReceiptStatus, ChainError> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            match self.chain.receipt(tx_hash).await? {
                ReceiptStatus::Missing => {
                    tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
                }
                status => return Ok(status),
            }
        }
        Ok(ReceiptStatus::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn test_nonce_allocation_is_sequential() {
        let nonces = NonceManager::new(5);
        assert_eq!(nonces.allocate().await, 5);
        assert_eq!(nonces.allocate().await, 6);
    }

    #[tokio::test]
    async fn test_nonce_release_rolls_back_latest() {
        let nonces = NonceManager::new(0);
        let a = nonces.allocate().await;
        nonces.release(a).await;
        assert_eq!(nonces.allocate().await, a);
    }

    #[tokio::test]
    async fn test_nonce_release_of_stale_nonce_keeps_gap() {
        let nonces = NonceManager::new(0);
        let a = nonces.allocate().await;
        let _b = nonces.allocate().await;
        nonces.release(a).await;
        // The gap is reserved: allocation continues past it.
        assert_eq!(nonces.allocate().await, 2);
    }

    #[test]
    fn test_merge_calldata_layout() {
        let condition = B256::repeat_byte(0xab);
        let calldata = merge_calldata(condition, 10);

        // Selector for mergePositions(address,bytes32,bytes32,uint256[],uint256).
        assert_eq!(&calldata[..4], &mergePositionsCall::SELECTOR);

        let decoded = mergePositionsCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded.parentCollectionId, B256::ZERO);
        assert_eq!(decoded.conditionId, condition);
        assert_eq!(decoded.partition, vec![U256::from(1u8), U256::from(2u8)]);
        assert_eq!(decoded.amount, U256::from(10u64 * UNIT_SCALE));
    }

    /// Scriptable in-memory chain for merge-path tests.
    struct ScriptedChain {
        /// Outcomes for successive `send` calls.
        sends: StdMutex<Vec<Result<TxHash, ChainError>>>,
        /// Outcomes for successive `receipt` calls.
        receipts: StdMutex<Vec<ReceiptStatus>>,
        /// Mergeable balance returned before each attempt.
        balances: StdMutex<Vec<u64>>,
        gas_calls: AtomicU64,
    }

    impl ScriptedChain {
        fn new(
            sends: Vec<Result<TxHash, ChainError>>,
            receipts: Vec<ReceiptStatus>,
            balances: Vec<u64>,
        ) -> Self {
            Self {
                sends: StdMutex::new(sends),
                receipts: StdMutex::new(receipts),
                balances: StdMutex::new(balances),
                gas_calls: AtomicU64::new(0),
            }
        }
    }

    impl PolygonChain for &ScriptedChain {
        async fn send(&self, _tx: TxRequest) -> Result<TxHash, ChainError> {
            self.sends.lock().unwrap().remove(0)
        }

        async fn receipt(&self, _tx: &TxHash) -> Result<ReceiptStatus, ChainError> {
            let mut receipts = self.receipts.lock().unwrap();
            if receipts.len() > 1 {
                Ok(receipts.remove(0))
            } else {
                Ok(receipts[0])
            }
        }

        async fn estimate_gas(&self, _to: Address, _calldata: &[u8]) -> Result<u64, ChainError> {
            self.gas_calls.fetch_add(1, Ordering::SeqCst);
            Ok(150_000)
        }

        async fn pending_nonce(&self) -> Result<u64, ChainError> {
            Ok(0)
        }

        async fn is_ctf_approved(&self, _operator: Address) -> Result<bool, ChainError> {
            Ok(true)
        }

        async fn mergeable_balance(&self, _condition_id: B256) -> Result<u64, ChainError> {
            let mut balances = self.balances.lock().unwrap();
            if balances.len() > 1 {
                Ok(balances.remove(0))
            } else {
                Ok(balances[0])
            }
        }
    }

    #[tokio::test]
    async fn test_merge_confirms_first_try() {
        let tx = TxHash::repeat_byte(0x01);
        let chain = ScriptedChain::new(
            vec![Ok(tx)],
            vec![ReceiptStatus::Confirmed { block: 100 }],
            vec![10 * UNIT_SCALE],
        );
        let merger = CtfMerger::new(&chain, 3);

        let receipt = merger.merge(B256::repeat_byte(0xcd), 10).await.unwrap();
        assert_eq!(receipt.tx_hash, tx);
        assert_eq!(receipt.attempts, 1);
        assert!(!receipt.already_merged);
    }

    #[tokio::test]
    async fn test_merge_retries_transient_send_with_fresh_gas() {
        let tx = TxHash::repeat_byte(0x02);
        let chain = ScriptedChain::new(
            vec![
                Err(ChainError::Transient("underpriced".into())),
                Ok(tx),
            ],
            vec![ReceiptStatus::Confirmed { block: 101 }],
            vec![5 * UNIT_SCALE],
        );
        let merger = CtfMerger::new(&chain, 3);

        let receipt = merger.merge(B256::repeat_byte(0xcd), 5).await.unwrap();
        assert_eq!(receipt.attempts, 2);
        // Gas was re-estimated on each attempt.
        assert_eq!(chain.gas_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_merge_idempotent_when_prior_attempt_landed() {
        // First submission "fails" transiently but actually lands; the
        // retry sees the burned pair balance and does not double-merge.
        let chain = ScriptedChain::new(
            vec![Err(ChainError::Transient("timeout after broadcast".into()))],
            vec![ReceiptStatus::Missing],
            vec![0],
        );
        let merger = CtfMerger::new(&chain, 3);

        let receipt = merger.merge(B256::repeat_byte(0xcd), 10).await.unwrap();
        assert!(receipt.already_merged);
        assert_eq!(receipt.attempts, 2);
    }

    #[tokio::test]
    async fn test_merge_reorg_retriggers_and_succeeds() {
        let tx1 = TxHash::repeat_byte(0x03);
        let tx2 = TxHash::repeat_byte(0x04);
        let chain = ScriptedChain::new(
            vec![Ok(tx1), Ok(tx2)],
            vec![
                // First attempt: confirmed, then the re-check finds it gone.
                ReceiptStatus::Confirmed { block: 102 },
                ReceiptStatus::Missing,
                // Second attempt: confirmed and stable.
                ReceiptStatus::Confirmed { block: 105 },
                ReceiptStatus::Confirmed { block: 105 },
            ],
            vec![10 * UNIT_SCALE],
        );
        let merger = CtfMerger::new(&chain, 3);

        let receipt = merger.merge(B256::repeat_byte(0xcd), 10).await.unwrap();
        assert_eq!(receipt.tx_hash, tx2);
        assert_eq!(receipt.attempts, 2);
    }

    #[tokio::test]
    async fn test_merge_exhausts_after_max_retries() {
        let chain = ScriptedChain::new(
            vec![
                Err(ChainError::Transient("a".into())),
                Err(ChainError::Transient("b".into())),
            ],
            vec![ReceiptStatus::Missing],
            vec![10 * UNIT_SCALE],
        );
        let merger = CtfMerger::new(&chain, 2);

        let err = merger.merge(B256::repeat_byte(0xcd), 10).await.unwrap_err();
        assert!(matches!(err, MergeError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_merge_revert_is_terminal() {
        let tx = TxHash::repeat_byte(0x05);
        let chain = ScriptedChain::new(
            vec![Ok(tx)],
            vec![ReceiptStatus::Failed],
            vec![10 * UNIT_SCALE],
        );
        let merger = CtfMerger::new(&chain, 3);

        let err = merger.merge(B256::repeat_byte(0xcd), 10).await.unwrap_err();
        assert!(matches!(err, MergeError::Reverted(_)));
    }
}

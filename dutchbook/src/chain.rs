//! Polygon JSON-RPC implementation of the engine's chain seam.
//!
//! Thin wrapper over an alloy provider with a local signer. The engine's
//! merge client supplies nonces and calldata; this adapter only transports
//! them and answers the view calls the idempotence checks need.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use dutchbook_execution::chain::ctf::{CTF_ADDRESS, USDC_E_ADDRESS};
use dutchbook_execution::chain::{ChainError, PolygonChain, ReceiptStatus, TxHash, TxRequest};

/// Polygon mainnet chain id.
const CHAIN_ID: u64 = 137;

sol! {
    function getCollectionId(bytes32 parentCollectionId, bytes32 conditionId, uint256 indexSet) returns (bytes32);
    function getPositionId(address collateralToken, bytes32 collectionId) returns (uint256);
    function balanceOf(address owner, uint256 id) returns (uint256);
    function isApprovedForAll(address owner, address operator) returns (bool);
}

/// RPC-backed Polygon access.
pub struct PolygonRpcChain<P> {
    provider: P,
    owner: Address,
    ctf: Address,
    collateral: Address,
}

/// Connect a provider with a local signer and wrap it.
pub fn connect(
    rpc_url: &str,
    private_key_hex: &str,
) -> Result<PolygonRpcChain<impl Provider + Clone>, ChainError> {
    let signer: PrivateKeySigner = private_key_hex
        .trim()
        .trim_start_matches("0x")
        .parse()
        .map_err(|e| ChainError::Fatal(format!("invalid polygon signer key: {e}")))?;
    let owner = signer.address();
    let wallet = EthereumWallet::from(signer);

    let url = rpc_url
        .parse()
        .map_err(|e| ChainError::Fatal(format!("invalid rpc url: {e}")))?;
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

    Ok(PolygonRpcChain {
        provider,
        owner,
        ctf: CTF_ADDRESS.parse().expect("static address"),
        collateral: USDC_E_ADDRESS.parse().expect("static address"),
    })
}

impl<P: Provider> PolygonRpcChain<P> {
    pub fn owner(&self) -> Address {
        self.owner
    }

    async fn view(&self, to: Address, calldata: Vec<u8>) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata);
        self.provider
            .call(request)
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))
    }

    /// Outcome token balance for one index set of a condition.
    async fn outcome_balance(&self, condition_id: B256, index_set: u8) -> Result<u64, ChainError> {
        let collection = self
            .view(
                self.ctf,
                getCollectionIdCall {
                    parentCollectionId: B256::ZERO,
                    conditionId: condition_id,
                    indexSet: U256::from(index_set),
                }
                .abi_encode(),
            )
            .await?;
        let collection = getCollectionIdCall::abi_decode_returns(&collection)
            .map_err(|e| ChainError::Fatal(e.to_string()))?;

        let position = self
            .view(
                self.ctf,
                getPositionIdCall {
                    collateralToken: self.collateral,
                    collectionId: collection,
                }
                .abi_encode(),
            )
            .await?;
        let position = getPositionIdCall::abi_decode_returns(&position)
            .map_err(|e| ChainError::Fatal(e.to_string()))?;

        let balance = self
            .view(
                self.ctf,
                balanceOfCall {
                    owner: self.owner,
                    id: position,
                }
                .abi_encode(),
            )
            .await?;
        let balance = balanceOfCall::abi_decode_returns(&balance)
            .map_err(|e| ChainError::Fatal(e.to_string()))?;

        Ok(balance.try_into().unwrap_or(u64::MAX))
    }
}

impl<P: Provider> PolygonChain for PolygonRpcChain<P> {
    async fn send(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let request = TransactionRequest::default()
            .with_to(tx.to)
            .with_input(tx.calldata)
            .with_nonce(tx.nonce)
            .with_gas_limit(tx.gas_limit)
            .with_chain_id(CHAIN_ID);

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx: &TxHash) -> Result<ReceiptStatus, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(*tx)
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))?;
        Ok(match receipt {
            Some(receipt) if receipt.status() => ReceiptStatus::Confirmed {
                block: receipt.block_number.unwrap_or(0),
            },
            Some(_) => ReceiptStatus::Failed,
            None => ReceiptStatus::Missing,
        })
    }

    async fn estimate_gas(&self, to: Address, calldata: &[u8]) -> Result<u64, ChainError> {
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata.to_vec())
            .with_from(self.owner);
        self.provider
            .estimate_gas(request)
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(self.owner)
            .pending()
            .await
            .map_err(|e| ChainError::Transient(e.to_string()))
    }

    async fn is_ctf_approved(&self, operator: Address) -> Result<bool, ChainError> {
        let approved = self
            .view(
                self.ctf,
                isApprovedForAllCall {
                    owner: self.owner,
                    operator,
                }
                .abi_encode(),
            )
            .await?;
        isApprovedForAllCall::abi_decode_returns(&approved)
            .map_err(|e| ChainError::Fatal(e.to_string()))
    }

    async fn mergeable_balance(&self, condition_id: B256) -> Result<u64, ChainError> {
        let yes = self.outcome_balance(condition_id, 1).await?;
        let no = self.outcome_balance(condition_id, 2).await?;
        Ok(yes.min(no))
    }
}

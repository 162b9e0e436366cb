//! Polymarket order signing and API authentication.
//!
//! Two layers:
//! 1. L2 API auth on every request: HMAC-SHA256 over
//!    `{timestamp}{method}{path}{body}` with the configured API secret.
//! 2. Order signing on submission: EIP-712 typed data signature over the
//!    CTF Exchange `Order` struct.
//!
//! EIP-712 domain:
//!   name = "Polymarket CTF Exchange", version = "1",
//!   chainId = 137 (Polygon), verifyingContract = exchange contract.

use alloy_primitives::{keccak256, Address, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Eip712Domain, SolStruct};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// CTF Exchange contract (regular markets) on Polygon mainnet.
pub const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Neg Risk CTF Exchange contract on Polygon mainnet.
pub const NEG_RISK_CTF_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

/// Polygon mainnet chain id.
pub const CHAIN_ID: u64 = 137;

sol! {
    /// The CTF Exchange order struct; field order fixes the type hash.
    #[derive(Debug)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

#[derive(Debug, Clone, Error)]
pub enum PolymarketSignError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Parameters for building and signing an order.
#[derive(Debug, Clone)]
pub struct OrderParams {
    pub salt: U256,
    pub maker: Address,
    /// Same as maker for EOA wallets.
    pub signer: Address,
    /// Zero address = public order.
    pub taker: Address,
    /// CTF ERC-1155 token id.
    pub token_id: U256,
    /// 6-decimal raw units.
    pub maker_amount: U256,
    pub taker_amount: U256,
    /// Unix seconds; 0 = no expiry.
    pub expiration: U256,
    pub nonce: U256,
    pub fee_rate_bps: U256,
    /// 0 = buy, 1 = sell.
    pub side: u8,
    /// 0 = EOA.
    pub signature_type: u8,
    pub neg_risk: bool,
}

fn exchange_domain(neg_risk: bool) -> Eip712Domain {
    let contract: Address = if neg_risk {
        NEG_RISK_CTF_EXCHANGE.parse().expect("static address")
    } else {
        CTF_EXCHANGE.parse().expect("static address")
    };

    Eip712Domain {
        name: Some("Polymarket CTF Exchange".into()),
        version: Some("1".into()),
        chain_id: Some(U256::from(CHAIN_ID)),
        verifying_contract: Some(contract),
        salt: None,
    }
}

fn parse_signer(private_key_hex: &str) -> Result<PrivateKeySigner, PolymarketSignError> {
    let hex = private_key_hex.trim();
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    hex.parse()
        .map_err(|e| PolymarketSignError::InvalidKey(format!("{e}")))
}

/// Sign an order with EIP-712 typed data signing.
///
/// Returns the 0x-prefixed hex signature (65 bytes: r + s + v).
pub fn sign_order(private_key_hex: &str, params: &OrderParams) -> Result<String, PolymarketSignError> {
    let signer = parse_signer(private_key_hex)?;

    let order = Order {
        salt: params.salt,
        maker: params.maker,
        signer: params.signer,
        taker: params.taker,
        tokenId: params.token_id,
        makerAmount: params.maker_amount,
        takerAmount: params.taker_amount,
        expiration: params.expiration,
        nonce: params.nonce,
        feeRateBps: params.fee_rate_bps,
        side: params.side,
        signatureType: params.signature_type,
    };

    let domain = exchange_domain(params.neg_risk);

    // EIP-712 signing hash: keccak256("\x19\x01" || domainSeparator || structHash)
    let domain_separator = domain.hash_struct();
    let struct_hash = order.eip712_hash_struct();
    let signing_hash = keccak256(
        [&[0x19, 0x01], domain_separator.as_slice(), struct_hash.as_slice()].concat(),
    );

    let signature = signer
        .sign_hash_sync(&signing_hash)
        .map_err(|e| PolymarketSignError::SigningFailed(format!("{e}")))?;

    Ok(format!("0x{}", hex::encode(signature.as_bytes())))
}

/// API credentials for the CLOB, supplied via configuration.
#[derive(Debug, Clone)]
pub struct PolymarketCredentials {
    pub api_key: String,
    /// Base64-encoded HMAC secret (URL-safe alphabet accepted).
    pub api_secret: String,
    pub api_passphrase: String,
    /// 0x-prefixed wallet address.
    pub wallet_address: String,
}

/// HMAC-SHA256 L2 signature over `{timestamp}{method}{path}{body}`.
///
/// Returns `(timestamp, signature)` with URL-safe base64 output.
pub fn l2_signature(
    creds: &PolymarketCredentials,
    timestamp: u64,
    method: &str,
    path: &str,
    body: &str,
) -> String {
    let message = format!("{timestamp}{method}{path}{body}");

    // Secrets may arrive in the URL-safe alphabet.
    let normalized = creds.api_secret.replace('-', "+").replace('_', "/");
    let secret = BASE64.decode(&normalized).unwrap_or_default();
    let mut mac = HmacSha256::new_from_slice(&secret).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();
    BASE64.encode(digest).replace('+', "-").replace('/', "_")
}

/// Full L2 header set for a CLOB request.
pub fn l2_headers(
    creds: &PolymarketCredentials,
    method: &str,
    path: &str,
    body: &str,
) -> Vec<(&'static str, String)> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs();
    let signature = l2_signature(creds, timestamp, method, path, body);

    vec![
        ("POLY_ADDRESS", creds.wallet_address.clone()),
        ("POLY_SIGNATURE", signature),
        ("POLY_TIMESTAMP", timestamp.to_string()),
        ("POLY_API_KEY", creds.api_key.clone()),
        ("POLY_PASSPHRASE", creds.api_passphrase.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test vector key; never fund it.
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn params() -> OrderParams {
        let maker: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        OrderParams {
            salt: U256::from(12345u64),
            maker,
            signer: maker,
            taker: Address::ZERO,
            token_id: U256::from(98765u64),
            maker_amount: U256::from(50_000_000u64),
            taker_amount: U256::from(100_000_000u64),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            fee_rate_bps: U256::ZERO,
            side: 0,
            signature_type: 0,
            neg_risk: false,
        }
    }

    #[test]
    fn test_sign_order_shape() {
        let sig = sign_order(TEST_KEY, &params()).unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 132); // 0x + 65 bytes hex
    }

    #[test]
    fn test_sign_order_is_deterministic() {
        let a = sign_order(TEST_KEY, &params()).unwrap();
        let b = sign_order(TEST_KEY, &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_neg_risk_changes_domain() {
        let regular = sign_order(TEST_KEY, &params()).unwrap();
        let neg_risk = sign_order(TEST_KEY, &OrderParams { neg_risk: true, ..params() }).unwrap();
        assert_ne!(regular, neg_risk);
    }

    #[test]
    fn test_0x_prefixed_key_accepted() {
        let with_prefix = format!("0x{TEST_KEY}");
        let a = sign_order(&with_prefix, &params()).unwrap();
        let b = sign_order(TEST_KEY, &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_l2_signature_is_stable_and_urlsafe() {
        let creds = PolymarketCredentials {
            api_key: "key".into(),
            api_secret: BASE64.encode(b"super-secret"),
            api_passphrase: "pass".into(),
            wallet_address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".into(),
        };

        let a = l2_signature(&creds, 1706313600, "POST", "/order", "{}");
        let b = l2_signature(&creds, 1706313600, "POST", "/order", "{}");
        assert_eq!(a, b);
        assert!(!a.contains('+') && !a.contains('/'));

        let different_body = l2_signature(&creds, 1706313600, "POST", "/order", "{\"a\":1}");
        assert_ne!(a, different_body);
    }
}

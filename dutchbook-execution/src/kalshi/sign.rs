//! Kalshi RSA-2048 PSS request signing.
//!
//! Every REST and WebSocket request carries three headers derived from the
//! member's RSA private key:
//!
//! 1. Message string: `{timestamp_ms}{METHOD}{path}`
//! 2. RSA-PSS (SHA-256, MGF1-SHA256) signature over the message
//! 3. Base64-encoded signature in `KALSHI-ACCESS-SIGNATURE`

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::DecodePrivateKey,
    pss::SigningKey,
    signature::{RandomizedSigner, SignatureEncoding},
    traits::PublicKeyParts,
    RsaPrivateKey,
};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Header carrying the API key id.
pub const HEADER_ACCESS_KEY: &str = "KALSHI-ACCESS-KEY";
/// Header carrying the base64 signature.
pub const HEADER_ACCESS_SIGNATURE: &str = "KALSHI-ACCESS-SIGNATURE";
/// Header carrying the millisecond timestamp.
pub const HEADER_ACCESS_TIMESTAMP: &str = "KALSHI-ACCESS-TIMESTAMP";

/// Path signed for WebSocket handshakes.
pub const WS_SIGN_PATH: &str = "/trade-api/ws/v2";

#[derive(Debug, Error)]
pub enum KalshiSignError {
    #[error("failed to parse RSA private key: {0}")]
    KeyParse(String),
    #[error("RSA key too small: {bits} bits, need at least 2048")]
    KeyTooSmall { bits: usize },
}

/// RSA signer for Kalshi API authentication.
#[derive(Clone)]
pub struct KalshiSigner {
    api_key: String,
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for KalshiSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiSigner")
            .field("api_key", &self.api_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KalshiSigner {
    /// Build from an API key and a PEM-encoded private key (PKCS#8 or PKCS#1).
    pub fn from_pem(api_key: impl Into<String>, pem: &str) -> Result<Self, KalshiSignError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KalshiSignError::KeyParse(e.to_string()))?;

        let bits = private_key.size() * 8;
        if bits < 2048 {
            return Err(KalshiSignError::KeyTooSmall { bits });
        }

        Ok(Self {
            api_key: api_key.into(),
            private_key,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign `{timestamp_ms}{METHOD}{path}` and return the base64 signature.
    pub fn sign(&self, timestamp_ms: u64, method: &str, path: &str) -> String {
        let message = format!("{timestamp_ms}{method}{path}");
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let mut rng = rsa::rand_core::OsRng;
        let signature = signing_key.sign_with_rng(&mut rng, message.as_bytes());
        BASE64.encode(signature.to_bytes())
    }

    /// Auth headers for a request to `path` (full API path, query excluded).
    pub fn headers(&self, method: &str, path: &str) -> [(&'static str, String); 3] {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64;
        let signature = self.sign(timestamp, method, path);
        [
            (HEADER_ACCESS_KEY, self.api_key.clone()),
            (HEADER_ACCESS_SIGNATURE, signature),
            (HEADER_ACCESS_TIMESTAMP, timestamp.to_string()),
        ]
    }

    /// Auth headers for the WebSocket handshake.
    pub fn ws_headers(&self) -> [(&'static str, String); 3] {
        self.headers("GET", WS_SIGN_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pss::VerifyingKey;
    use rsa::signature::Verifier;

    fn test_signer() -> KalshiSigner {
        // Key generation is slow; do it once per test binary.
        use std::sync::OnceLock;
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        let key = KEY
            .get_or_init(|| {
                let mut rng = rsa::rand_core::OsRng;
                RsaPrivateKey::new(&mut rng, 2048).expect("keygen")
            })
            .clone();
        KalshiSigner {
            api_key: "test-member".to_string(),
            private_key: key,
        }
    }

    #[test]
    fn test_signature_verifies_against_public_key() {
        let signer = test_signer();
        let sig_b64 = signer.sign(1706313600000, "GET", "/trade-api/v2/portfolio/balance");

        let verifying_key =
            VerifyingKey::<Sha256>::new(signer.private_key.to_public_key());
        let sig_bytes = BASE64.decode(sig_b64).unwrap();
        let signature = rsa::pss::Signature::try_from(sig_bytes.as_slice()).unwrap();

        let message = "1706313600000GET/trade-api/v2/portfolio/balance";
        verifying_key
            .verify(message.as_bytes(), &signature)
            .expect("signature must verify");
    }

    #[test]
    fn test_tampered_message_fails_verification() {
        let signer = test_signer();
        let sig_b64 = signer.sign(1706313600000, "GET", "/trade-api/v2/portfolio/balance");

        let verifying_key =
            VerifyingKey::<Sha256>::new(signer.private_key.to_public_key());
        let sig_bytes = BASE64.decode(sig_b64).unwrap();
        let signature = rsa::pss::Signature::try_from(sig_bytes.as_slice()).unwrap();

        let tampered = "1706313600000POST/trade-api/v2/portfolio/balance";
        assert!(verifying_key.verify(tampered.as_bytes(), &signature).is_err());
    }

    #[test]
    fn test_headers_shape() {
        let signer = test_signer();
        let headers = signer.headers("POST", "/trade-api/v2/portfolio/orders");
        assert_eq!(headers[0].0, HEADER_ACCESS_KEY);
        assert_eq!(headers[0].1, "test-member");
        assert_eq!(headers[1].0, HEADER_ACCESS_SIGNATURE);
        assert!(BASE64.decode(&headers[1].1).is_ok());
        assert_eq!(headers[2].0, HEADER_ACCESS_TIMESTAMP);
        assert!(headers[2].1.parse::<u64>().is_ok());
    }
}

//! Webhook signature verification
//!
//! The provider signs the raw request body with HMAC-SHA256, keyed with the
//! SHA-256 digest of the API token, and sends the hex digest in
//! [`SIGNATURE_HEADER`].

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";

/// Verify `signature_hex` over `body`. Fails closed on an empty secret.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let signature = match hex::decode(signature_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let key = Sha256::digest(secret.as_bytes());
    let mut mac = match HmacSha256::new_from_slice(&key) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);

    // constant-time comparison
    mac.verify_slice(&signature).is_ok()
}

/// Hex signature of `body`, as the provider computes it
pub fn sign(secret: &str, body: &[u8]) -> String {
    let key = Sha256::digest(secret.as_bytes());
    match HmacSha256::new_from_slice(&key) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

//! Settlement signature helpers.
//!
//! The payment gateway signs the raw settlement body with HMAC-SHA256 under a
//! shared secret and sends the hex digest alongside it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, message: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(mac)
}

/// Compute HMAC-SHA256 of `message` and return it hex-encoded (64 characters).
///
/// Returns `None` only if the key is rejected, which HMAC never does for
/// SHA-256 (RFC 2104 accepts any key length).
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Option<String> {
    mac_for(secret, message).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature against `message` in constant time.
///
/// Malformed hex and an empty secret both fail verification.
#[must_use]
pub fn verify_signature(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    mac_for(secret, message).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

//! Hashing and MAC helpers.
//!
//! - SHA-256 request signatures the web flow attaches to approval and cancel calls
//! - HMAC-SHA256 for signing outbound order-store webhooks
//! - constant-time comparison for bearer tokens

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// `signature` parameter of a web-flow server call.
pub fn web_signature(auth_token: &str, timestamp: &str) -> String {
    sha256_hex(&format!("authToken={auth_token}&timestamp={timestamp}"))
}

/// `verification` parameter of a web-flow server call. Proves possession of
/// the merchant sign key.
pub fn web_verification(auth_token: &str, sign_key: &str, timestamp: &str) -> String {
    sha256_hex(&format!(
        "authToken={auth_token}&signKey={sign_key}&timestamp={timestamp}"
    ))
}

/// Compute HMAC-SHA256 over the given body bytes using the shared secret.
/// Returns the hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison that leaks neither content nor length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

//! HMAC-SHA256 body signatures carried in the `HashSHA256` header.
//!
//! The signature always covers the exact bytes placed in the HTTP body
//! before encryption: for agent requests that is the gzip stream, for
//! server responses the uncompressed payload.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}

/// Returns the hex-encoded HMAC-SHA256 of `body` under `key`.
///
/// # Examples
///
/// ```
/// use metron_common::signature::{sign, verify};
///
/// let sig = sign(b"payload", b"secret");
/// assert_eq!(sig.len(), 64);
/// assert!(verify(b"payload", b"secret", &sig));
/// assert!(!verify(b"payload!", b"secret", &sig));
/// ```
pub fn sign(body: &[u8], key: &[u8]) -> String {
    let mut mac = keyed(key);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex signature in constant time. Malformed hex never verifies.
pub fn verify(body: &[u8], key: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = keyed(key);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

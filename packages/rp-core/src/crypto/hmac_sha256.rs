//! HMAC-SHA256 and SHA-256, and the IV-derivation helper built from them.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// `HMAC_SHA256(key, msg)`.
#[must_use]
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// `SHA256(data)`.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `HMAC_SHA256(host_hmac_key, nonce ‖ counter_be64)[:16]`.
///
/// Used both by the registration cipher (§4.2 step 5) and the session-layer
/// control cipher (§4.6): a 64-bit monotonic counter, incremented per
/// encrypt/decrypt, re-derives a fresh IV for every message rather than
/// reusing one across an entire session.
#[must_use]
pub fn derive_iv(host_hmac_key: &[u8], nonce: &[u8; 16], counter: u64) -> [u8; 16] {
    let mut msg = Vec::with_capacity(24);
    msg.extend_from_slice(nonce);
    msg.extend_from_slice(&counter.to_be_bytes());
    let digest = hmac_sha256(host_hmac_key, &msg);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256(b"key", b"msg");
        let b = hmac_sha256(b"key", b"msg");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_iv_changes_with_counter() {
        let key = [1u8; 16];
        let nonce = [2u8; 16];
        let iv0 = derive_iv(&key, &nonce, 0);
        let iv1 = derive_iv(&key, &nonce, 1);
        assert_ne!(iv0, iv1);
    }
}

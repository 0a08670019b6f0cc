//! GMAC: a 4-byte authentication tag derived from AES-GCM with an empty
//! plaintext, used to authenticate every Takion message (§4.4, §4.5).

use aes::Aes128;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{AesGcm, KeyInit, Nonce};

/// Full-nonce AES-128-GCM: the console protocol uses a 16-byte IV rather
/// than the usual 96-bit GCM nonce, so this instantiates the generic
/// `AesGcm` construction over a 16-byte nonce size instead of the crate's
/// default `Aes128Gcm` alias.
type Aes128GcmFullNonce = AesGcm<Aes128, U16>;

/// Computes the first 4 bytes of `AES-GCM(key, nonce, aad, plaintext = "")`.
///
/// `aad` is the assembled `type‖key_pos‖zeroed_tag‖plaintext` buffer; with an
/// empty plaintext the GCM ciphertext is exactly the 16-byte tag, so no
/// ciphertext bytes are produced or discarded.
#[must_use]
pub fn gmac4(key: &[u8; 16], iv: &[u8; 16], aad: &[u8]) -> [u8; 4] {
    let cipher = Aes128GcmFullNonce::new(key.into());
    let nonce = Nonce::<Aes128GcmFullNonce>::from_slice(iv);
    let tag = cipher
        .encrypt(nonce, Payload { msg: &[], aad })
        .expect("GCM encryption of an empty plaintext cannot fail");
    let mut out = [0u8; 4];
    out.copy_from_slice(&tag[..4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmac_is_deterministic_and_aad_sensitive() {
        let key = [9u8; 16];
        let iv = [3u8; 16];
        let a = gmac4(&key, &iv, b"hello");
        let b = gmac4(&key, &iv, b"hello");
        let c = gmac4(&key, &iv, b"hellp");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

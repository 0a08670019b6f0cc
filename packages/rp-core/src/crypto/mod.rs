//! Cryptographic primitives shared by the registration, session, and stream
//! ciphers.
//!
//! Nothing in the teacher repository this crate was built from touches
//! cryptography directly (Sonos speaks plain UPnP/SOAP over HTTP); these
//! primitives are sourced from the broader retrieval pack instead (see
//! `DESIGN.md`) and wrapped in the same small, single-purpose-module style
//! the teacher uses elsewhere (one concern per file, `pub(crate)` where a
//! helper has no business outside this crate).

mod control_cipher;
mod ecdh;
mod gmac;
mod hmac_sha256;
mod keystream;

pub use control_cipher::ControlCipher;
pub use ecdh::StreamEcdh;
pub use gmac::gmac4;
pub use hmac_sha256::{derive_iv, hmac_sha256, sha256};
pub use keystream::{aes_ecb_block, KeystreamCache};

use crate::error::CryptoError;

/// AES-CFB(128) encryption in place. Used by the registration cipher and the
/// session-layer control-channel cipher (§4.2, §4.6) — never by the stream
/// cipher, which uses its own keystream construction (§4.5).
pub fn cfb_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
    cfb_mode::Encryptor::<aes::Aes128>::new(key.into(), iv.into()).encrypt(data);
}

/// AES-CFB(128) decryption in place.
pub fn cfb_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
    cfb_mode::Decryptor::<aes::Aes128>::new(key.into(), iv.into()).decrypt(data);
}

/// Increments a 16-byte IV as a little-endian counter with carry, the
/// `counter_add` primitive referenced throughout §4.5.
pub fn counter_add(iv: &[u8; 16], amount: u64) -> [u8; 16] {
    let mut out = *iv;
    let mut carry = amount;
    for byte in out.iter_mut() {
        if carry == 0 {
            break;
        }
        let sum = u64::from(*byte) + (carry & 0xFF);
        *byte = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    out
}

/// Folds a 32-byte digest into 16 bytes by XOR-ing the two halves, used when
/// rekeying the GMAC key (§4.5: "folded by XOR of halves").
pub fn fold_halves(digest: &[u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = digest[i] ^ digest[i + 16];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfb_round_trips() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let mut buf = b"Client-Type: dabfa2ec\r\n".to_vec();
        let original = buf.clone();
        cfb_encrypt(&key, &iv, &mut buf);
        assert_ne!(buf, original);
        cfb_decrypt(&key, &iv, &mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn counter_add_carries() {
        let iv = [0xFFu8, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let out = counter_add(&iv, 1);
        assert_eq!(out[0], 0x00);
        assert_eq!(out[1], 0x01);
    }

    #[test]
    fn fold_halves_is_xor_of_halves() {
        let mut digest = [0u8; 32];
        digest[0] = 0xAA;
        digest[16] = 0x55;
        let folded = fold_halves(&digest);
        assert_eq!(folded[0], 0xFF);
    }
}

/// Error helper for callers that need to turn a missing/invalid signature
/// into the crate's `CryptoError` without repeating the match everywhere.
pub(crate) fn invalid_signature<T>() -> Result<T, CryptoError> {
    Err(CryptoError::EcdhSignatureInvalid)
}

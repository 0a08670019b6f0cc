//! The Takion stream cipher (§4.5): a `LocalCipher` (send) + `RemoteCipher`
//! (receive) pair, each with its own keystream derivation but sharing the
//! same handshake key and ECDH secret.
//!
//! Collapses the teacher-pattern-absent `BaseCipher` → `LocalCipher`/
//! `RemoteCipher` class hierarchy the source exhibits (spec.md §9 REDESIGN
//! FLAGS) into a single `StreamCipher` value holding two small structs, each
//! wrapping one [`KeystreamCache`] plus the GMAC derivation state — per
//! DESIGN.md open question #2, `Role::Sender`/`Role::Receiver` is expressed
//! here as two distinct types rather than one enum-tagged struct, since
//! their mutation rules differ (`LocalCipher` owns `key_pos`; `RemoteCipher`
//! is handed it by the caller).

use crate::crypto::{fold_halves, gmac4, hmac_sha256, sha256, KeystreamCache};
use crate::error::CryptoError;

/// GMAC rekey period: key_pos values in `(index*45000, (index+1)*45000]`
/// share one GMAC key (§4.5).
const GMAC_REKEY_PERIOD: u32 = 45_000;
/// Stride applied to the rekey index when deriving the next GMAC key's IV.
const GMAC_REKEY_STRIDE: u32 = 44_910;

/// `BaseIndex` for the send-side keystream derivation.
const LOCAL_BASE_INDEX: u8 = 2;
/// `BaseIndex` for the receive-side keystream derivation.
const REMOTE_BASE_INDEX: u8 = 3;

fn derive_base(secret: &[u8; 32], handshake_key: &[u8; 16], index: u8) -> ([u8; 16], [u8; 16]) {
    let mut msg = Vec::with_capacity(21);
    msg.push(0x01);
    msg.push(index);
    msg.push(0x00);
    msg.extend_from_slice(handshake_key);
    msg.push(0x01);
    msg.push(0x00);
    let digest = hmac_sha256(secret, &msg);
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    iv.copy_from_slice(&digest[16..]);
    (key, iv)
}

fn rekey_index(key_pos: u32) -> u32 {
    if key_pos == 0 {
        0
    } else {
        (key_pos - 1) / GMAC_REKEY_PERIOD
    }
}

fn gmac_key_for(base_key: &[u8; 16], base_iv: &[u8; 16], key_pos: u32) -> [u8; 16] {
    let index = rekey_index(key_pos);
    if index == 0 {
        return *base_key;
    }
    let rekey_iv = crate::crypto::counter_add(base_iv, u64::from(index) * u64::from(GMAC_REKEY_STRIDE));
    let mut seed = Vec::with_capacity(32);
    seed.extend_from_slice(base_key);
    seed.extend_from_slice(&rekey_iv);
    fold_halves(&sha256(&seed))
}

/// Assembles `type‖key_pos‖zeroed_tag‖plaintext`, the buffer the GMAC is
/// computed over both when sending (before XOR) and receiving (after XOR).
fn assemble(msg_type: u8, key_pos: u32, plaintext: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + plaintext.len());
    buf.push(msg_type);
    buf.extend_from_slice(&key_pos.to_be_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(plaintext);
    buf
}

fn gmac_for(base_key: &[u8; 16], base_iv: &[u8; 16], key_pos: u32, assembled: &[u8]) -> [u8; 4] {
    let gmac_key = gmac_key_for(base_key, base_iv, key_pos);
    let counter = u64::from(key_pos) / 16;
    let iv = crate::crypto::counter_add(base_iv, counter);
    gmac4(&gmac_key, &iv, assembled)
}

/// Send-side cipher. Owns the single-writer `key_pos` cursor (§5 "single-
/// writer invariant").
pub struct LocalCipher {
    base_key: [u8; 16],
    base_iv: [u8; 16],
    keystream: KeystreamCache,
    key_pos: u32,
}

impl LocalCipher {
    #[must_use]
    pub fn new(handshake_key: [u8; 16], secret: [u8; 32]) -> Self {
        let (base_key, base_iv) = derive_base(&secret, &handshake_key, LOCAL_BASE_INDEX);
        Self {
            base_key,
            base_iv,
            keystream: KeystreamCache::new(base_key, base_iv),
            key_pos: 0,
        }
    }

    #[must_use]
    pub fn key_pos(&self) -> u32 {
        self.key_pos
    }

    /// Encrypts `plaintext` in place, returning the `(key_pos, gmac)` to
    /// place in the header. Advances `key_pos` by `plaintext.len()` (§8:
    /// `key_pos' = p + L`), wrapping at `u32::MAX` without corrupting the
    /// keystream (§8 boundary behaviour).
    pub fn encrypt(&mut self, msg_type: u8, plaintext: &mut [u8]) -> (u32, [u8; 4]) {
        let key_pos = self.key_pos;
        let assembled = assemble(msg_type, key_pos, plaintext);
        let gmac = gmac_for(&self.base_key, &self.base_iv, key_pos, &assembled);
        self.keystream.xor_at(key_pos, plaintext);
        self.key_pos = self.key_pos.wrapping_add(plaintext.len() as u32);
        (key_pos, gmac)
    }
}

/// Receive-side cipher. `key_pos` is supplied by the caller (the wire
/// header) rather than tracked internally.
pub struct RemoteCipher {
    base_key: [u8; 16],
    base_iv: [u8; 16],
    keystream: KeystreamCache,
}

impl RemoteCipher {
    #[must_use]
    pub fn new(handshake_key: [u8; 16], secret: [u8; 32]) -> Self {
        let (base_key, base_iv) = derive_base(&secret, &handshake_key, REMOTE_BASE_INDEX);
        Self {
            base_key,
            base_iv,
            keystream: KeystreamCache::new(base_key, base_iv),
        }
    }

    /// Test-only constructor mirroring a peer's `LocalCipher` base key/IV
    /// (rather than independently deriving them with `REMOTE_BASE_INDEX`),
    /// so tests elsewhere in the crate can exercise an encrypt/decrypt round
    /// trip without standing up two full sessions. A real session's
    /// `LocalCipher` and `RemoteCipher` are never paired this way — each
    /// derives its own base from its own `BaseIndex` (§4.5).
    #[cfg(test)]
    pub(crate) fn mirror_of(local: &LocalCipher) -> Self {
        Self {
            base_key: local.base_key,
            base_iv: local.base_iv,
            keystream: KeystreamCache::new(local.base_key, local.base_iv),
        }
    }

    /// Verifies `gmac` and decrypts `ciphertext` in place. On mismatch,
    /// `ciphertext` is left untouched and no state is mutated (§4.4: "On
    /// mismatch: drop, count as `auth_fail`, do not advance state").
    pub fn decrypt(
        &mut self,
        msg_type: u8,
        key_pos: u32,
        gmac: [u8; 4],
        ciphertext: &mut [u8],
    ) -> Result<(), CryptoError> {
        let mut plaintext = ciphertext.to_vec();
        self.keystream.xor_at(key_pos, &mut plaintext);
        let assembled = assemble(msg_type, key_pos, &plaintext);
        let expected = gmac_for(&self.base_key, &self.base_iv, key_pos, &assembled);
        if expected != gmac {
            return Err(CryptoError::GmacMismatch);
        }
        ciphertext.copy_from_slice(&plaintext);
        Ok(())
    }
}

/// The compound send/receive pair for one session (§3 Data Model:
/// `StreamCipher`).
pub struct StreamCipher {
    pub local: LocalCipher,
    pub remote: RemoteCipher,
}

impl StreamCipher {
    #[must_use]
    pub fn new(handshake_key: [u8; 16], secret: [u8; 32]) -> Self {
        Self {
            local: LocalCipher::new(handshake_key, secret),
            remote: RemoteCipher::new(handshake_key, secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> (LocalCipher, RemoteCipher) {
        let local = LocalCipher::new([9u8; 16], [3u8; 32]);
        let remote = RemoteCipher::mirror_of(&local);
        (local, remote)
    }

    #[test]
    fn encrypt_then_decrypt_recovers_plaintext_and_authenticates() {
        let (mut local, mut remote) = paired();

        let original = b"hello takion".to_vec();
        let mut buf = original.clone();
        let (key_pos, gmac) = local.encrypt(2, &mut buf);

        remote.decrypt(2, key_pos, gmac, &mut buf).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn tampered_gmac_is_rejected_without_mutating_buffer() {
        let (mut local, mut remote) = paired();

        let original = b"hello takion".to_vec();
        let mut buf = original.clone();
        let (key_pos, mut gmac) = local.encrypt(2, &mut buf);
        let ciphertext_before = buf.clone();
        gmac[0] ^= 0xFF;

        let result = remote.decrypt(2, key_pos, gmac, &mut buf);
        assert!(result.is_err());
        assert_eq!(buf, ciphertext_before, "rejected packet must not mutate the buffer");
    }

    #[test]
    fn key_pos_advances_by_plaintext_length() {
        let mut local = LocalCipher::new([1; 16], [2; 32]);
        let mut buf = vec![0u8; 37];
        let (start, _) = local.encrypt(2, &mut buf);
        assert_eq!(start, 0);
        assert_eq!(local.key_pos(), 37);
    }

    #[test]
    fn key_pos_wraps_without_panicking() {
        let mut local = LocalCipher::new([1; 16], [2; 32]);
        local.key_pos = u32::MAX - 4;
        let mut buf = vec![0u8; 10];
        let (start, _) = local.encrypt(2, &mut buf);
        assert_eq!(start, u32::MAX - 4);
        assert_eq!(local.key_pos(), 5); // wrapped
    }

    #[test]
    fn gmac_rekeys_past_the_period_boundary() {
        let local = LocalCipher::new([1; 16], [2; 32]);
        let before = gmac_key_for(&local.base_key, &local.base_iv, GMAC_REKEY_PERIOD);
        let after = gmac_key_for(&local.base_key, &local.base_iv, GMAC_REKEY_PERIOD + 1);
        assert_ne!(before, after);
    }
}

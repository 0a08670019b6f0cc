//! ECDH over secp256k1 (§4.3): each side generates an ephemeral keypair,
//! signs its public point with the session `handshake_key`, and derives a
//! shared secret from the peer's verified point.

use k256::ecdh::EphemeralSecret;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use rand::rngs::OsRng;

use crate::error::CryptoError;

use super::hmac_sha256;

/// One side's ephemeral ECDH keypair plus its uncompressed public point.
pub struct StreamEcdh {
    secret: EphemeralSecret,
    public_point: [u8; 65],
}

impl StreamEcdh {
    /// Generates a fresh ephemeral keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let encoded = secret.public_key().to_encoded_point(false);
        let mut public_point = [0u8; 65];
        public_point.copy_from_slice(encoded.as_bytes());
        Self {
            secret,
            public_point,
        }
    }

    /// Returns the 65-byte uncompressed public point to send to the peer.
    #[must_use]
    pub fn public_point(&self) -> [u8; 65] {
        self.public_point
    }

    /// `HMAC_SHA256(handshake_key, public_point)`, the signature attached
    /// alongside the public point in the BIG/BANG exchange.
    #[must_use]
    pub fn sign(&self, handshake_key: &[u8; 16]) -> [u8; 32] {
        hmac_sha256(handshake_key, &self.public_point)
    }

    /// Verifies a peer's signature over their own public point.
    pub fn verify(
        handshake_key: &[u8; 16],
        peer_public_point: &[u8; 65],
        peer_signature: &[u8; 32],
    ) -> Result<(), CryptoError> {
        let expected = hmac_sha256(handshake_key, peer_public_point);
        if constant_time_eq(&expected, peer_signature) {
            Ok(())
        } else {
            Err(CryptoError::EcdhSignatureInvalid)
        }
    }

    /// Derives the 32-byte shared secret (the x-coordinate of the ECDH
    /// point, left-padded to 32 bytes — k256's fixed-size field element
    /// representation gives this for free) from a verified peer point.
    pub fn shared_secret(&self, peer_public_point: &[u8; 65]) -> Result<[u8; 32], CryptoError> {
        let peer_public =
            PublicKey::from_sec1_bytes(peer_public_point).map_err(|_| CryptoError::EcdhSignatureInvalid)?;
        let shared = self.secret.diffie_hellman(&peer_public);
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_shared_secret() {
        let local = StreamEcdh::generate();
        let remote = StreamEcdh::generate();

        let local_secret = local.shared_secret(&remote.public_point()).unwrap();
        let remote_secret = remote.shared_secret(&local.public_point()).unwrap();

        assert_eq!(local_secret, remote_secret);
    }

    #[test]
    fn signature_round_trips() {
        let handshake_key = [5u8; 16];
        let ecdh = StreamEcdh::generate();
        let sig = ecdh.sign(&handshake_key);
        assert!(StreamEcdh::verify(&handshake_key, &ecdh.public_point(), &sig).is_ok());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let handshake_key = [5u8; 16];
        let ecdh = StreamEcdh::generate();
        let mut sig = ecdh.sign(&handshake_key);
        sig[0] ^= 0xFF;
        assert!(StreamEcdh::verify(&handshake_key, &ecdh.public_point(), &sig).is_err());
    }
}

//! The Takion wire codec (§4.4): fixed 9-byte prefix (`type`, `key_pos`,
//! `gmac`) followed by the XOR-encrypted payload.
//!
//! Grounded on `sonos/discovery/ssdp.rs`'s message-building idiom (a small
//! free function assembling a fixed-shape ASCII datagram), generalized here
//! to a binary, typed, authenticated datagram.

use crate::error::CryptoError;
use crate::protocol_constants::TAKION_HEADER_LEN;

use super::cipher::{LocalCipher, RemoteCipher};

/// Takion message type discriminator (§4.4, §6.1 — literal values are part
/// of the wire contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Big,
    Video,
    Audio,
    Congestion,
    FeedbackState,
    FeedbackEvent,
    ClientInfo,
    Heartbeat,
    Bang,
    Init,
    /// Console-to-client haptic rumble notification (§3 Data Model:
    /// `RumbleEvent`). Not among the literal values spec.md §4.4 enumerates;
    /// the source's rumble wire format is undocumented and firmware-
    /// dependent (DESIGN.md open question #5), so this discriminator is this
    /// crate's own assignment rather than a value recovered from the source.
    Rumble,
    /// Any discriminator not in the set above; preserved for forward
    /// compatibility with console firmware this crate has not seen.
    Other(u8),
}

impl MessageType {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Big => 1,
            Self::Video => 2,
            Self::Audio => 3,
            Self::Congestion => 5,
            Self::FeedbackState => 6,
            Self::FeedbackEvent => 7,
            Self::ClientInfo => 8,
            Self::Heartbeat => 9,
            Self::Rumble => 10,
            Self::Bang => 0x20,
            Self::Init => 0x30,
            Self::Other(b) => b,
        }
    }
}

impl From<u8> for MessageType {
    fn from(b: u8) -> Self {
        match b {
            1 => Self::Big,
            2 => Self::Video,
            3 => Self::Audio,
            5 => Self::Congestion,
            6 => Self::FeedbackState,
            7 => Self::FeedbackEvent,
            8 => Self::ClientInfo,
            9 => Self::Heartbeat,
            10 => Self::Rumble,
            0x20 => Self::Bang,
            0x30 => Self::Init,
            other => Self::Other(other),
        }
    }
}

/// A decoded, authenticated Takion datagram.
pub struct Decoded {
    pub msg_type: MessageType,
    pub key_pos: u32,
    pub payload: Vec<u8>,
}

/// Encodes and encrypts one outbound message (§4.4 "Sending" steps 1-4).
#[must_use]
pub fn encode(local: &mut LocalCipher, msg_type: MessageType, mut plaintext: Vec<u8>) -> Vec<u8> {
    let (key_pos, gmac) = local.encrypt(msg_type.as_u8(), &mut plaintext);

    let mut out = Vec::with_capacity(TAKION_HEADER_LEN + plaintext.len());
    out.push(msg_type.as_u8());
    out.extend_from_slice(&key_pos.to_be_bytes());
    out.extend_from_slice(&gmac);
    out.extend_from_slice(&plaintext);
    out
}

/// Decodes and authenticates one inbound datagram (§4.4 "Receiving" steps
/// 1-2). Returns `Err(CryptoError::GmacMismatch)` on authentication
/// failure; the caller is responsible for counting `auth_fail` and dropping
/// the packet without dispatching it.
pub fn decode(remote: &mut RemoteCipher, datagram: &[u8]) -> Result<Decoded, CryptoError> {
    if datagram.len() < TAKION_HEADER_LEN {
        return Err(CryptoError::CfbDecryptMalformed);
    }
    let msg_type = MessageType::from(datagram[0]);
    let key_pos = u32::from_be_bytes(datagram[1..5].try_into().expect("4 bytes"));
    let gmac: [u8; 4] = datagram[5..9].try_into().expect("4 bytes");
    let mut payload = datagram[9..].to_vec();

    remote.decrypt(msg_type.as_u8(), key_pos, gmac, &mut payload)?;

    Ok(Decoded {
        msg_type,
        key_pos,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_u8() {
        for t in [
            MessageType::Big,
            MessageType::Video,
            MessageType::Audio,
            MessageType::Congestion,
            MessageType::FeedbackState,
            MessageType::FeedbackEvent,
            MessageType::ClientInfo,
            MessageType::Heartbeat,
            MessageType::Bang,
            MessageType::Init,
        ] {
            assert_eq!(MessageType::from(t.as_u8()).as_u8(), t.as_u8());
        }
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut local = LocalCipher::new([1; 16], [2; 32]);
        let mut remote = RemoteCipher::mirror_of(&local);

        let datagram = encode(&mut local, MessageType::Video, b"a video packet".to_vec());
        let decoded = decode(&mut remote, &datagram).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Video);
        assert_eq!(decoded.payload, b"a video packet");
    }

    #[test]
    fn short_datagram_is_rejected() {
        let local = LocalCipher::new([1; 16], [2; 32]);
        let mut remote = RemoteCipher::mirror_of(&local);
        assert!(decode(&mut remote, &[1, 2, 3]).is_err());
    }

    #[test]
    fn forged_tag_is_rejected() {
        let mut local = LocalCipher::new([1; 16], [2; 32]);
        let mut remote = RemoteCipher::mirror_of(&local);

        let mut datagram = encode(&mut local, MessageType::Video, b"payload".to_vec());
        datagram[5] ^= 0xFF; // corrupt the gmac
        assert!(decode(&mut remote, &datagram).is_err());
    }
}

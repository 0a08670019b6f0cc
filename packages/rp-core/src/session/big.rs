//! BIG/BANG payload framing (§4.3 steps 3-7, §6.1 GLOSSARY).
//!
//! `BIG` is the client→console launch descriptor (carries the ECDH public
//! point + signature on the way out, and the 16-byte session-id on the way
//! back); `BANG` is the console's ECDH public point + signature. Both are
//! flat, length-prefixed binary records — this crate was not handed the
//! console vendor's exact `BuildBigPayloadRaw` byte layout (spec.md §4.3
//! step 4 names it without defining its internal framing), so the layout
//! below is this crate's own internally-consistent encoding, built the same
//! way `sonos/discovery/ssdp.rs` assembles its fixed-shape datagrams: a
//! small free function per direction, `u16`-length-prefixed variable
//! fields, no padding.

use crate::error::ProtocolError;

/// Fields of the client→console BIG launch descriptor (§4.3 step 4).
pub struct BigLaunchSpec<'a> {
    pub client_version: &'a str,
    pub session_key: &'a [u8],
    pub launch_spec: &'a [u8],
    pub enc_key: &'a [u8; 16],
    pub ecdh_pub: &'a [u8; 65],
    pub ecdh_sig: &'a [u8; 32],
}

fn put_lp(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

fn take_lp<'a>(buf: &'a [u8], offset: &mut usize) -> Result<&'a [u8], ProtocolError> {
    if buf.len() < *offset + 2 {
        return Err(ProtocolError::MalformedBig);
    }
    let len = u16::from_be_bytes(buf[*offset..*offset + 2].try_into().expect("2 bytes")) as usize;
    *offset += 2;
    if buf.len() < *offset + len {
        return Err(ProtocolError::MalformedBig);
    }
    let out = &buf[*offset..*offset + len];
    *offset += len;
    Ok(out)
}

/// Encodes the client→console BIG payload (§4.3 step 4:
/// `BuildBigPayloadRaw(client_version, session_key, launch_spec, enc_key,
/// ecdh_pub, ecdh_sig)`).
#[must_use]
pub fn build_big_payload(spec: &BigLaunchSpec<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    put_lp(&mut out, spec.client_version.as_bytes());
    put_lp(&mut out, spec.session_key);
    put_lp(&mut out, spec.launch_spec);
    put_lp(&mut out, spec.enc_key);
    put_lp(&mut out, spec.ecdh_pub);
    put_lp(&mut out, spec.ecdh_sig);
    out
}

/// The console's reply BIG, carrying the 16-byte session-id (§4.3 step 7).
#[must_use]
pub fn build_big_session_id_reply(session_id: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::new();
    put_lp(&mut out, session_id);
    out
}

/// Parses the console's reply BIG, extracting the session-id.
pub fn parse_big_session_id(payload: &[u8]) -> Result<[u8; 16], ProtocolError> {
    let mut offset = 0;
    let field = take_lp(payload, &mut offset)?;
    field.try_into().map_err(|_| ProtocolError::MalformedBig)
}

/// Console→client BANG: ECDH public point + signature over it (§4.3 step 5).
pub struct BangPayload {
    pub ecdh_pub: [u8; 65],
    pub ecdh_sig: [u8; 32],
}

#[must_use]
pub fn build_bang_payload(ecdh_pub: &[u8; 65], ecdh_sig: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::new();
    put_lp(&mut out, ecdh_pub);
    put_lp(&mut out, ecdh_sig);
    out
}

pub fn parse_bang_payload(payload: &[u8]) -> Result<BangPayload, ProtocolError> {
    let mut offset = 0;
    let pub_field = take_lp(payload, &mut offset)?;
    let sig_field = take_lp(payload, &mut offset)?;
    Ok(BangPayload {
        ecdh_pub: pub_field.try_into().map_err(|_| ProtocolError::MalformedBang)?,
        ecdh_sig: sig_field.try_into().map_err(|_| ProtocolError::MalformedBang)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bang_payload_round_trips() {
        let ecdh_pub = [7u8; 65];
        let ecdh_sig = [8u8; 32];
        let encoded = build_bang_payload(&ecdh_pub, &ecdh_sig);
        let decoded = parse_bang_payload(&encoded).unwrap();
        assert_eq!(decoded.ecdh_pub, ecdh_pub);
        assert_eq!(decoded.ecdh_sig, ecdh_sig);
    }

    #[test]
    fn big_session_id_round_trips() {
        let session_id = [5u8; 16];
        let encoded = build_big_session_id_reply(&session_id);
        assert_eq!(parse_big_session_id(&encoded).unwrap(), session_id);
    }

    #[test]
    fn truncated_bang_is_rejected() {
        assert!(parse_bang_payload(&[0, 5, 1, 2, 3]).is_err());
    }

    #[test]
    fn big_launch_spec_round_trips_every_field() {
        let enc_key = [1u8; 16];
        let ecdh_pub = [2u8; 65];
        let ecdh_sig = [3u8; 32];
        let spec = BigLaunchSpec {
            client_version: "10.0",
            session_key: b"sesskey",
            launch_spec: b"resolution=1080p;fps=60",
            enc_key: &enc_key,
            ecdh_pub: &ecdh_pub,
            ecdh_sig: &ecdh_sig,
        };
        let encoded = build_big_payload(&spec);
        let mut offset = 0;
        assert_eq!(take_lp(&encoded, &mut offset).unwrap(), b"10.0");
        assert_eq!(take_lp(&encoded, &mut offset).unwrap(), b"sesskey");
    }
}

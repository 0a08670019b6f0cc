//! Video/audio codec framing (§4.8): NAL-type detection and Annex-B
//! normalization for H.264/HEVC, passthrough for Opus.
//!
//! Grounded on `stream/mod.rs`'s `AudioFormat`/`AudioCodec` enum shape,
//! generalized from the teacher's single PCM/Opus distinction to the three
//! negotiated video codecs plus Opus audio passthrough.

use serde::{Deserialize, Serialize};

/// Negotiated video codec (§4.8: `stream_type` 1=h264, 2=hevc, 3=hevc+hdr).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    Hevc,
    HevcHdr,
}

impl VideoCodec {
    /// Parses the wire `stream_type` discriminant (§4.8).
    #[must_use]
    pub fn from_stream_type(stream_type: u8) -> Option<Self> {
        match stream_type {
            1 => Some(Self::H264),
            2 => Some(Self::Hevc),
            3 => Some(Self::HevcHdr),
            _ => None,
        }
    }

    fn is_hevc_family(self) -> bool {
        matches!(self, Self::Hevc | Self::HevcHdr)
    }
}

/// Negotiated audio codec. Opus is the only one the console negotiates;
/// kept as an enum (rather than a bare constant) so the `Receiver` contract
/// in `codec` stays symmetric with `VideoCodec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Opus,
}

/// A single NAL unit as located within an access unit buffer: the start
/// code's byte length (3 or 4) and the NAL payload bytes following it.
struct NalUnit<'a> {
    start_code_len: usize,
    body: &'a [u8],
}

fn h264_nal_type(byte0: u8) -> u8 {
    byte0 & 0x1F
}

fn hevc_nal_type(byte0: u8) -> u8 {
    (byte0 >> 1) & 0x3F
}

fn is_keyframe_critical(codec: VideoCodec, nal_type: u8) -> bool {
    if codec.is_hevc_family() {
        matches!(nal_type, 32 | 33 | 34 | 19 | 20)
    } else {
        matches!(nal_type, 7 | 8 | 5)
    }
}

/// Finds every start code (`00 00 01` or `00 00 00 01`) in `buf`, returning
/// `(offset_of_first_0x00, code_len)` pairs in ascending order.
fn find_start_codes(buf: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                out.push((i, 3));
                i += 3;
                continue;
            }
            if i + 4 <= buf.len() && buf[i + 2] == 0 && buf[i + 3] == 1 {
                out.push((i, 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    out
}

fn split_nal_units(buf: &[u8]) -> Vec<NalUnit<'_>> {
    let codes = find_start_codes(buf);
    let mut units = Vec::with_capacity(codes.len());
    for (idx, &(offset, code_len)) in codes.iter().enumerate() {
        let body_start = offset + code_len;
        let body_end = codes.get(idx + 1).map_or(buf.len(), |&(next_offset, _)| next_offset);
        units.push(NalUnit {
            start_code_len: code_len,
            body: &buf[body_start..body_end],
        });
    }
    units
}

/// Rewrites `access_unit` so every SPS/PPS/IDR (H.264) or VPS/SPS/PPS/IDR
/// (HEVC) NAL is preceded by a 4-byte `00 00 00 01` start code, upgrading
/// any 3-byte start code found in front of one (§4.8). NAL units that are
/// not keyframe-critical keep whatever start code they arrived with.
#[must_use]
pub fn to_annex_b(codec: VideoCodec, access_unit: &[u8]) -> Vec<u8> {
    let units = split_nal_units(access_unit);
    if units.is_empty() {
        return access_unit.to_vec();
    }

    let mut out = Vec::with_capacity(access_unit.len() + units.len());
    for unit in units {
        let nal_type = unit
            .body
            .first()
            .map(|&b| {
                if codec.is_hevc_family() {
                    hevc_nal_type(b)
                } else {
                    h264_nal_type(b)
                }
            })
            .unwrap_or(0);

        let critical = unit.body.first().is_some() && is_keyframe_critical(codec, nal_type);
        if critical {
            out.extend_from_slice(&[0, 0, 0, 1]);
        } else if unit.start_code_len == 4 {
            out.extend_from_slice(&[0, 0, 0, 1]);
        } else {
            out.extend_from_slice(&[0, 0, 1]);
        }
        out.extend_from_slice(unit.body);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_nal_type_masks_low_five_bits() {
        assert_eq!(h264_nal_type(0x67), 7); // SPS
        assert_eq!(h264_nal_type(0x68), 8); // PPS
        assert_eq!(h264_nal_type(0x65), 5); // IDR
    }

    #[test]
    fn hevc_nal_type_shifts_and_masks() {
        assert_eq!(hevc_nal_type(0x40), 32); // VPS
        assert_eq!(hevc_nal_type(0x42), 33); // SPS
        assert_eq!(hevc_nal_type(0x44), 34); // PPS
    }

    #[test]
    fn three_byte_start_code_before_sps_is_upgraded_to_four() {
        let mut buf = vec![0, 0, 1];
        buf.push(0x67); // SPS
        buf.extend_from_slice(&[1, 2, 3]);
        let out = to_annex_b(VideoCodec::H264, &buf);
        assert_eq!(&out[..4], &[0, 0, 0, 1]);
    }

    #[test]
    fn non_critical_nal_keeps_its_original_start_code() {
        let mut buf = vec![0, 0, 1];
        buf.push(0x41); // non-IDR slice, type 1
        buf.extend_from_slice(&[9, 9]);
        let out = to_annex_b(VideoCodec::H264, &buf);
        assert_eq!(&out[..3], &[0, 0, 1]);
    }

    #[test]
    fn empty_access_unit_round_trips_to_empty() {
        assert!(to_annex_b(VideoCodec::H264, &[]).is_empty());
    }

    #[test]
    fn video_codec_parses_stream_type() {
        assert_eq!(VideoCodec::from_stream_type(1), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::from_stream_type(3), Some(VideoCodec::HevcHdr));
        assert_eq!(VideoCodec::from_stream_type(9), None);
    }
}

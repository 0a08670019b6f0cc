//! PS4/PS5 vendor key tables used to derive `key0`/`key1` (§4.2 steps 2–3).
//!
//! The real tables are opaque vendor byte blobs embedded verbatim in the
//! console vendor's own client; this crate was not given access to them and
//! does not fabricate console cryptographic material. What follows are
//! deterministic placeholder tables of the shape the algorithm expects
//! (512 bytes, indexed at `i*32+1` and `i*32+8` for `i in 0..16`), generated
//! from a fixed seed per host type so registration is reproducible in tests.
//! Swap [`vendor_key_0`]/[`vendor_key_1`] for the real tables to interop
//! with a physical console. See `DESIGN.md` open question #1.

use crate::host_type::HostType;

const TABLE_LEN: usize = 512;

fn splitmix64_table(mut seed: u64) -> [u8; TABLE_LEN] {
    let mut out = [0u8; TABLE_LEN];
    for chunk in out.chunks_mut(8) {
        seed = seed.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = seed;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        let bytes = z.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    out
}

/// Vendor key-0 table, keyed by host type.
#[must_use]
pub fn vendor_key_0(host_type: HostType) -> [u8; TABLE_LEN] {
    match host_type {
        HostType::Ps4 => splitmix64_table(0x5053_3400_4B45_5930), // "PS4\0KEY0"
        HostType::Ps5 => splitmix64_table(0x5053_3500_4B45_5930), // "PS5\0KEY0"
    }
}

/// Vendor key-1 table, keyed by host type.
#[must_use]
pub fn vendor_key_1(host_type: HostType) -> [u8; TABLE_LEN] {
    match host_type {
        HostType::Ps4 => splitmix64_table(0x5053_3400_4B45_5931), // "PS4\0KEY1"
        HostType::Ps5 => splitmix64_table(0x5053_3500_4B45_5931), // "PS5\0KEY1"
    }
}

/// The per-index offset added when deriving `key1` (§4.2 step 3): `+41` for
/// PS4, `-45` for PS5.
#[must_use]
pub fn key1_offset(host_type: HostType) -> i32 {
    match host_type {
        HostType::Ps4 => 41,
        HostType::Ps5 => -45,
    }
}

/// Host-specific HMAC key used to derive the registration/session-control
/// IV (§4.2 step 5, §4.6): `HMAC_SHA256(host_hmac_key, nonce‖counter)[:16]`.
/// Same provenance as the key-0/key-1 tables: an opaque per-host-type vendor
/// constant, not derivable from anything else in this crate.
#[must_use]
pub fn registration_hmac_key(host_type: HostType) -> [u8; 16] {
    let table = splitmix64_table(match host_type {
        HostType::Ps4 => 0x5053_3400_484D_4143, // "PS4\0HMAC"
        HostType::Ps5 => 0x5053_3500_484D_4143, // "PS5\0HMAC"
    });
    let mut out = [0u8; 16];
    out.copy_from_slice(&table[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_deterministic() {
        assert_eq!(vendor_key_0(HostType::Ps4), vendor_key_0(HostType::Ps4));
    }

    #[test]
    fn ps4_and_ps5_tables_differ() {
        assert_ne!(vendor_key_0(HostType::Ps4), vendor_key_0(HostType::Ps5));
        assert_ne!(vendor_key_1(HostType::Ps4), vendor_key_1(HostType::Ps5));
    }

    #[test]
    fn hmac_keys_differ_by_host_type() {
        assert_ne!(registration_hmac_key(HostType::Ps4), registration_hmac_key(HostType::Ps5));
    }

    #[test]
    fn index_bounds_fit_table() {
        // Derivation reads i*32+1 and i*32+8 for i in 0..16; largest index is
        // 15*32+8 = 488, which must fit within TABLE_LEN.
        assert!(15 * 32 + 8 < TABLE_LEN);
    }
}

//! Kademlia XOR log-distance and random-ID-at-distance sampling.

use rand::RngCore;

use crate::record::NodeId;

/// `logdist(a, b) = 256 - leading_zero_bits(a XOR b)`, or `0` when `a == b`.
///
/// Bucket placement in both [`crate::registration`] and [`crate::search`] is
/// keyed on this value.
pub fn logdist(a: &NodeId, b: &NodeId) -> u32 {
    let mut lz = 0u32;
    for i in 0..32 {
        let x = a[i] ^ b[i];
        if x == 0 {
            lz += 8;
        } else {
            lz += x.leading_zeros();
            break;
        }
    }
    256 - lz
}

/// Sample a uniformly random ID whose `logdist` to `center` is exactly `d`.
///
/// Flips the bit that determines the distance (bit `256 - d`, counting bit 0
/// as the most significant bit of `center`), then randomizes every less
/// significant bit. Bits more significant than the flip point are left
/// untouched so they keep agreeing with `center`, which is what pins the
/// distance at exactly `d` rather than merely "at most `d`".
///
/// `d = 0` returns `center` itself, matching `logdist(center, center) == 0`.
///
/// # Panics
///
/// Panics if `d > 256` — a log-distance is never in that range.
pub fn random_id_at(center: &NodeId, d: u32) -> NodeId {
    random_id_at_with_rng(&mut rand::thread_rng(), center, d)
}

/// As [`random_id_at`], but with an injected RNG for deterministic tests.
pub fn random_id_at_with_rng<R: RngCore + ?Sized>(rng: &mut R, center: &NodeId, d: u32) -> NodeId {
    assert!(d <= 256, "log-distance {d} out of range 0..=256");
    if d == 0 {
        return *center;
    }

    let mut result = *center;
    let pos = 256 - d; // 0-indexed bit position from the MSB where the flip lands.
    let byte_idx = (pos / 8) as usize;
    let bit_in_byte = 7 - (pos % 8); // shift within the byte, MSB-first.

    result[byte_idx] ^= 1 << bit_in_byte;

    if byte_idx + 1 < 32 {
        rng.fill_bytes(&mut result[byte_idx + 1..]);
    }

    // Randomize the remaining, less-significant bits within the flipped byte.
    let mask: u8 = if bit_in_byte == 0 {
        0
    } else {
        (1u8 << bit_in_byte) - 1
    };
    if mask != 0 {
        let random_bits = (rng.next_u32() as u8) & mask;
        result[byte_idx] = (result[byte_idx] & !mask) | random_bits;
    }

    result
}

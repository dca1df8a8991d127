//! `D` independent hash functions (spec §3: "a single high-quality hash
//! keyed by `D` distinct salts is acceptable").
//!
//! Each of the `D` probe functions hashes `salt || key` through
//! `std::collections::hash_map::DefaultHasher` (SipHash-1-3), which is
//! enough independence to keep displacement chains short without pulling
//! in a dedicated hashing crate the teacher's stack has no other use for.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Cuckoo dimension: the number of independent candidate positions a key
/// may occupy (spec §3: "4 in practice").
pub const DIMENSION: usize = 4;

/// Fixed, distinct per-probe salts. Arbitrary but stable for the process
/// lifetime — changing them would just relabel which slot is "probe 0",
/// not change the algorithm's correctness.
const SALTS: [u64; DIMENSION] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0xFF51_AFD7_ED55_8CCD,
];

/// Compute the `D` candidate table indices for `key`, modulo `table_len`.
///
/// `table_len` must be nonzero; the table is always allocated with at
/// least one slot.
pub fn probes(key: &[u8], table_len: usize) -> [usize; DIMENSION] {
    debug_assert!(table_len > 0);
    let mut out = [0usize; DIMENSION];
    for (i, salt) in SALTS.iter().enumerate() {
        let mut hasher = DefaultHasher::new();
        salt.hash(&mut hasher);
        key.hash(&mut hasher);
        out[i] = (hasher.finish() % table_len as u64) as usize;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_are_deterministic() {
        let a = probes(b"hello", 1024);
        let b = probes(b"hello", 1024);
        assert_eq!(a, b);
    }

    #[test]
    fn probes_fall_within_table_bounds() {
        let p = probes(b"some-key", 17);
        for idx in p {
            assert!(idx < 17);
        }
    }

    #[test]
    fn different_keys_usually_differ() {
        let a = probes(b"key-one", 1 << 20);
        let b = probes(b"key-two", 1 << 20);
        assert_ne!(a, b);
    }

    #[test]
    fn probes_within_a_key_are_spread_across_salts() {
        // Not a strict requirement, but for a non-pathological key the 4
        // salted hashes should rarely all collide on a reasonably large table.
        let p = probes(b"distinct-probe-check", 1 << 16);
        let distinct: std::collections::HashSet<_> = p.iter().collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn single_slot_table_always_probes_zero() {
        let p = probes(b"anything", 1);
        assert_eq!(p, [0, 0, 0, 0]);
    }
}

//! Content-derived tree shaping.
//!
//! A Merkle Search Tree places every key at a level computed from the key's
//! own hash. Because the level depends on nothing but the key, the tree built
//! for a key set is unique and its root hash does not depend on the order in
//! which keys were inserted.
//!
//! Each level consumes [`BITS_PER_LEVEL`] leading zero bits of the key hash,
//! so a key reaches level `n` with probability `16^-n` and nodes hold about
//! sixteen keys on average.

use tessera_types::BlockId;

use crate::hasher::ContentHasher;

/// Leading zero bits of the key hash consumed per tree level.
pub const BITS_PER_LEVEL: u32 = 4;

/// Number of leading zero bits in a digest, most significant bit first.
pub fn leading_zero_bits(hash: &BlockId) -> u32 {
    let mut zeros = 0;
    for byte in hash.as_bytes() {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

/// Whether a key with hash `key_hash` reaches `level`.
///
/// Every key is a boundary at level 0. Boundaries nest: a key that is a
/// boundary at level `n` is one at every level below `n`.
pub fn is_boundary(key_hash: &BlockId, level: u32) -> bool {
    leading_zero_bits(key_hash) >= level.saturating_mul(BITS_PER_LEVEL)
}

/// The level at which `key` lives: the highest level it is a boundary of.
pub fn key_level(key: &[u8]) -> u32 {
    leading_zero_bits(&ContentHasher::KEY.hash(key)) / BITS_PER_LEVEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zeros_across_bytes() {
        let mut raw = [0u8; 32];
        raw[1] = 0b0001_0000;
        assert_eq!(leading_zero_bits(&BlockId::from_hash(raw)), 11);
        assert_eq!(leading_zero_bits(&BlockId::from_hash([0; 32])), 256);
        assert_eq!(leading_zero_bits(&BlockId::from_hash([0xff; 32])), 0);
    }

    #[test]
    fn every_key_is_a_level_zero_boundary() {
        let hash = BlockId::from_hash([0xff; 32]);
        assert!(is_boundary(&hash, 0));
        assert!(!is_boundary(&hash, 1));
    }

    #[test]
    fn boundaries_nest() {
        let mut raw = [0xffu8; 32];
        raw[0] = 0;
        let hash = BlockId::from_hash(raw);
        assert!(is_boundary(&hash, 2));
        assert!(is_boundary(&hash, 1));
        assert!(!is_boundary(&hash, 3));
    }

    #[test]
    fn key_level_matches_boundary_predicate() {
        for i in 0..2_000u32 {
            let key = format!("key-{i}");
            let level = key_level(key.as_bytes());
            let hash = ContentHasher::KEY.hash(key.as_bytes());
            assert!(is_boundary(&hash, level));
            assert!(!is_boundary(&hash, level + 1));
        }
    }

    #[test]
    fn levels_follow_expected_distribution() {
        let total = 20_000u32;
        let raised = (0..total)
            .filter(|i| key_level(&i.to_be_bytes()) > 0)
            .count() as f64;
        let expected = f64::from(total) / 16.0;
        assert!((raised - expected).abs() < expected * 0.2, "raised = {raised}");
    }
}

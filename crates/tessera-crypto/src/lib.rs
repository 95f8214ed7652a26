//! Hashing primitives for Tessera.
//!
//! Provides domain-separated BLAKE3 hashing for blocks and keys, and the
//! content-derived boundary predicate that fixes the shape of every Merkle
//! Search Tree.
//!
//! All crypto operations wrap established libraries — no custom cryptography.

pub mod boundary;
pub mod hasher;

pub use boundary::{is_boundary, key_level, leading_zero_bits, BITS_PER_LEVEL};
pub use hasher::ContentHasher;

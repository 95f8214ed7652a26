//! Foundation types for Tessera.
//!
//! Every other Tessera crate depends on `tessera-types`. It carries the one
//! identity that the whole engine is addressed by:
//!
//! - [`BlockId`] — content identifier of a stored block (BLAKE3 digest)
//! - [`TypeError`] — parsing failures for the types in this crate

pub mod block_id;
pub mod error;

pub use block_id::BlockId;
pub use error::TypeError;

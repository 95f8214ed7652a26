//! Content-addressed block storage for Tessera.
//!
//! Every tree node Tessera writes is stored as an immutable block identified
//! by its BLAKE3 hash (domain `tessera-block-v1`). The store never interprets
//! block contents.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlockStore`] trait:
//!
//! - [`InMemoryBlockStore`] -- `HashMap`-based store used by live databases
//! - `ArchiveReader` in `tessera-archive` -- read-only store over one archive file
//!
//! # Design Rules
//!
//! 1. Blocks are immutable once written; identical bytes are stored once.
//! 2. Blocks are never deleted. A database replaces its whole store on import.
//! 3. Concurrent reads are always safe.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod block;
pub mod error;
pub mod memory;
pub mod traits;

pub use block::Block;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBlockStore;
pub use traits::BlockStore;

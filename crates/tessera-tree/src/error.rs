//! Error types for the tree crate.

use tessera_types::BlockId;

/// Errors that can occur during tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The key is not present in the tree.
    #[error("key not found: {}", hex::encode(.0))]
    KeyNotFound(Vec<u8>),

    /// A block reachable from a root does not decode as a valid node.
    #[error("corrupt node {id}: {reason}")]
    CorruptNode { id: BlockId, reason: String },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] tessera_store::StoreError),

    /// A node could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Convenience alias for tree results.
pub type TreeResult<T> = Result<T, TreeError>;

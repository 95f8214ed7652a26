use tessera_crypto::ContentHasher;
use tessera_types::BlockId;

use crate::error::{StoreError, StoreResult};

/// A stored block: raw bytes plus cached size.
///
/// `Block` is the unit of storage. Its identity is the domain-separated hash
/// of `data`; see [`Block::compute_id`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// The block's bytes.
    pub data: Vec<u8>,
    /// The size of `data` in bytes.
    pub size: u64,
}

impl Block {
    /// Create a block from raw bytes.
    pub fn new(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { data, size }
    }

    /// Compute the content-addressed id of this block.
    pub fn compute_id(&self) -> BlockId {
        Self::id_for(&self.data)
    }

    /// Content-addressed id of arbitrary bytes.
    pub fn id_for(data: &[u8]) -> BlockId {
        ContentHasher::BLOCK.hash(data)
    }

    /// Check that this block hashes to `expected`.
    pub fn verify(&self, expected: &BlockId) -> StoreResult<()> {
        let computed = self.compute_id();
        if computed != *expected {
            return Err(StoreError::HashMismatch {
                id: *expected,
                computed,
            });
        }
        Ok(())
    }
}

impl From<Vec<u8>> for Block {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_cached() {
        let block = Block::new(vec![1, 2, 3]);
        assert_eq!(block.size, 3);
    }

    #[test]
    fn id_is_domain_separated() {
        let block = Block::new(b"node".to_vec());
        assert_eq!(block.compute_id(), ContentHasher::BLOCK.hash(b"node"));
        assert_ne!(block.compute_id(), BlockId::digest(b"node"));
    }

    #[test]
    fn verify_detects_mismatch() {
        let block = Block::new(b"node".to_vec());
        assert!(block.verify(&block.compute_id()).is_ok());

        let other = Block::id_for(b"other");
        assert!(matches!(
            block.verify(&other),
            Err(StoreError::HashMismatch { id, .. }) if id == other
        ));
    }
}

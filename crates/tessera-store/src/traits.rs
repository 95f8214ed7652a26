use tessera_types::BlockId;

use crate::block::Block;
use crate::error::{StoreError, StoreResult};

/// Content-addressed block store.
///
/// All implementations must satisfy these invariants:
/// - Blocks are immutable once written: the same bytes always produce the
///   same id, and writing them again is a no-op.
/// - There is no deletion.
/// - Concurrent reads are always safe.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlockStore: Send + Sync {
    /// Read a block by id.
    ///
    /// Returns `Ok(None)` if the block does not exist.
    /// Returns `Err` on I/O failure or data corruption.
    fn read(&self, id: &BlockId) -> StoreResult<Option<Block>>;

    /// Write bytes as a block and return their id. Idempotent.
    fn write(&self, data: &[u8]) -> StoreResult<BlockId>;

    /// Check whether a block exists in the store.
    fn exists(&self, id: &BlockId) -> StoreResult<bool>;

    /// Read a block that must exist.
    fn get(&self, id: &BlockId) -> StoreResult<Block> {
        self.read(id)?.ok_or(StoreError::NotFound(*id))
    }

    /// Read multiple blocks in a batch.
    ///
    /// Default implementation calls `read()` for each id.
    fn read_batch(&self, ids: &[BlockId]) -> StoreResult<Vec<Option<Block>>> {
        ids.iter().map(|id| self.read(id)).collect()
    }

    /// Write multiple blocks in a batch and return their ids.
    ///
    /// Default implementation calls `write()` for each block.
    fn write_batch(&self, blocks: &[Vec<u8>]) -> StoreResult<Vec<BlockId>> {
        blocks.iter().map(|data| self.write(data)).collect()
    }
}

use std::collections::HashMap;
use std::sync::RwLock;

use tessera_types::BlockId;

use crate::block::Block;
use crate::error::StoreResult;
use crate::traits::BlockStore;

/// In-memory, HashMap-based block store.
///
/// Backs every live database. All blocks are held in memory behind a
/// `RwLock` for safe concurrent access. Blocks are cloned on read.
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<BlockId, Block>>,
}

impl InMemoryBlockStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blocks.
    pub fn total_bytes(&self) -> u64 {
        self.blocks
            .read()
            .expect("lock poisoned")
            .values()
            .map(|block| block.size)
            .sum()
    }

    /// Return a sorted list of all block ids in the store.
    pub fn all_ids(&self) -> Vec<BlockId> {
        let map = self.blocks.read().expect("lock poisoned");
        let mut ids: Vec<BlockId> = map.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn read(&self, id: &BlockId) -> StoreResult<Option<Block>> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn write(&self, data: &[u8]) -> StoreResult<BlockId> {
        let id = Block::id_for(data);
        {
            let map = self.blocks.read().expect("lock poisoned");
            if map.contains_key(&id) {
                return Ok(id);
            }
        }
        let mut map = self.blocks.write().expect("lock poisoned");
        map.entry(id).or_insert_with(|| Block::new(data.to_vec()));
        Ok(id)
    }

    fn exists(&self, id: &BlockId) -> StoreResult<bool> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }
}

impl std::fmt::Debug for InMemoryBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlockStore")
            .field("block_count", &self.len())
            .finish()
    }
}

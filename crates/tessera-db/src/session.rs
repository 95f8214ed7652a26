//! The mutation session: the working state of a database between flushes.

use std::collections::BTreeMap;

use tessera_tree::MerkleSearchTree;
use tessera_types::BlockId;

use crate::error::{DbError, DbResult};

/// Working roots of a database.
///
/// `root` is the database tree as written so far. Index roots changed since
/// the session began are buffered in `index_roots`, keyed by their pointer
/// key, and land in the database tree only on [`Session::commit`].
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub root: Option<BlockId>,
    pub index_roots: BTreeMap<Vec<u8>, Option<BlockId>>,
}

impl Session {
    pub fn begin(root: Option<BlockId>) -> Self {
        Self {
            root,
            index_roots: BTreeMap::new(),
        }
    }

    /// Current root of the index whose pointer lives at `key`.
    pub fn index_root(&self, tree: &MerkleSearchTree, key: &[u8]) -> DbResult<Option<BlockId>> {
        if let Some(root) = self.index_roots.get(key) {
            return Ok(*root);
        }
        match tree.get(self.root, key)? {
            None => Ok(None),
            Some(bytes) => decode_pointer(&bytes),
        }
    }

    /// Write the buffered index roots into the database tree and return the
    /// resulting root.
    pub fn commit(self, tree: &MerkleSearchTree) -> DbResult<Option<BlockId>> {
        let mut root = self.root;
        for (key, index_root) in &self.index_roots {
            let pointer = index_root.map(|id| id.as_bytes().to_vec()).unwrap_or_default();
            root = Some(tree.put(root, key, &pointer)?);
        }
        Ok(root)
    }
}

fn decode_pointer(bytes: &[u8]) -> DbResult<Option<BlockId>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    BlockId::from_slice(bytes)
        .map(Some)
        .map_err(|e| DbError::Decode(format!("index root pointer: {e}")))
}

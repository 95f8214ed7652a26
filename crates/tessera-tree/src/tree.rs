//! The Merkle Search Tree engine: point reads, copy-on-write updates and
//! canonical bulk construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_crypto::key_level;
use tessera_store::BlockStore;
use tessera_types::BlockId;
use tracing::debug;

use crate::diff::TreeDiff;
use crate::error::{TreeError, TreeResult};
use crate::iter::TreeIter;
use crate::merge::{merge_trees, Precedence};
use crate::node::{load_node, store_node, Node, NodeEntry};
use crate::proof::{build_proof, Proof};

/// Stateless engine over a shared block store.
///
/// Roots are passed explicitly, so any number of trees live side by side in
/// one store and share every identical sub-tree. `None` is the empty tree.
/// Updates never modify stored nodes: they write new nodes along the path to
/// the changed key and return the new root.
#[derive(Clone)]
pub struct MerkleSearchTree {
    store: Arc<dyn BlockStore>,
}

impl MerkleSearchTree {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    /// The block store this engine resolves roots against.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Look up `key` under `root`.
    pub fn get(&self, root: Option<BlockId>, key: &[u8]) -> TreeResult<Option<Vec<u8>>> {
        let mut link = root;
        while let Some(id) = link {
            let node = load_node(self.store.as_ref(), &id)?;
            match node.find(key) {
                Ok(i) => return Ok(node.entries.into_iter().nth(i).map(|e| e.value)),
                Err(slot) => link = node.child(slot),
            }
        }
        Ok(None)
    }

    /// Whether `key` is present under `root`.
    pub fn contains(&self, root: Option<BlockId>, key: &[u8]) -> TreeResult<bool> {
        Ok(self.get(root, key)?.is_some())
    }

    /// Ascending iterator over every entry.
    pub fn iter(&self, root: Option<BlockId>) -> TreeIter {
        TreeIter::new(Arc::clone(&self.store), root, None, None)
    }

    /// Ascending iterator over entries with keys `>= start`.
    pub fn iter_from(&self, root: Option<BlockId>, start: &[u8]) -> TreeIter {
        TreeIter::new(Arc::clone(&self.store), root, Some(start.to_vec()), None)
    }

    /// Ascending iterator over entries whose keys start with `prefix`.
    pub fn iter_prefix(&self, root: Option<BlockId>, prefix: &[u8]) -> TreeIter {
        TreeIter::new(
            Arc::clone(&self.store),
            root,
            Some(prefix.to_vec()),
            Some(prefix.to_vec()),
        )
    }

    /// Entries whose keys start with `prefix`, beginning at the first key
    /// `>= start`.
    pub fn iter_prefix_from(&self, root: Option<BlockId>, prefix: &[u8], start: &[u8]) -> TreeIter {
        let start = start.max(prefix);
        TreeIter::new(
            Arc::clone(&self.store),
            root,
            Some(start.to_vec()),
            Some(prefix.to_vec()),
        )
    }

    /// Number of entries under `root`. Walks the whole tree.
    pub fn len(&self, root: Option<BlockId>) -> TreeResult<usize> {
        let mut count = 0;
        for entry in self.iter(root) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Insert or replace `key`, returning the new root.
    ///
    /// Putting a value equal to the stored one returns `root` unchanged.
    pub fn put(&self, root: Option<BlockId>, key: &[u8], value: &[u8]) -> TreeResult<BlockId> {
        let level = key_level(key);
        self.insert(root, key, value, level)
    }

    /// Remove `key`, returning the new root. Absent keys leave `root` as is.
    pub fn delete(&self, root: Option<BlockId>, key: &[u8]) -> TreeResult<Option<BlockId>> {
        let level = key_level(key);
        Ok(self.remove(root, key, level)?.unwrap_or(root))
    }

    /// Build the canonical tree for `entries` in one pass.
    ///
    /// Later entries win over earlier ones with the same key. The result is
    /// the root that any sequence of puts of the same final key set yields.
    pub fn build<I>(&self, entries: I) -> TreeResult<Option<BlockId>>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let sorted: BTreeMap<Vec<u8>, Vec<u8>> = entries.into_iter().collect();
        let leveled: Vec<(u32, Vec<u8>, Vec<u8>)> = sorted
            .into_iter()
            .map(|(key, value)| (key_level(&key), key, value))
            .collect();
        debug!(entries = leveled.len(), "building tree");
        self.build_range(&leveled)
    }

    fn build_range(&self, entries: &[(u32, Vec<u8>, Vec<u8>)]) -> TreeResult<Option<BlockId>> {
        let Some(level) = entries.iter().map(|(level, _, _)| *level).max() else {
            return Ok(None);
        };

        let mut node = Node {
            level,
            left: None,
            entries: Vec::new(),
        };
        let mut gap_start = 0;
        for (i, (key_level, key, value)) in entries.iter().enumerate() {
            if *key_level != level {
                continue;
            }
            let child = self.build_range(&entries[gap_start..i])?;
            node.set_child(node.entries.len(), child);
            node.entries.push(NodeEntry {
                key: key.clone(),
                value: value.clone(),
                right: None,
            });
            gap_start = i + 1;
        }
        let last = self.build_range(&entries[gap_start..])?;
        node.set_child(node.entries.len(), last);

        Ok(Some(store_node(self.store.as_ref(), &node)?))
    }

    fn insert(
        &self,
        link: Option<BlockId>,
        key: &[u8],
        value: &[u8],
        level: u32,
    ) -> TreeResult<BlockId> {
        let Some(id) = link else {
            return store_node(
                self.store.as_ref(),
                &Node::leaf(level, key.to_vec(), value.to_vec()),
            );
        };
        let mut node = load_node(self.store.as_ref(), &id)?;

        if node.level < level {
            let (lo, hi) = self.split(Some(id), key)?;
            let parent = Node {
                level,
                left: lo,
                entries: vec![NodeEntry {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    right: hi,
                }],
            };
            return store_node(self.store.as_ref(), &parent);
        }

        match node.find(key) {
            Ok(i) => {
                if node.entries[i].value == value {
                    return Ok(id);
                }
                node.entries[i].value = value.to_vec();
            }
            Err(slot) if node.level == level => {
                let (lo, hi) = self.split(node.child(slot), key)?;
                node.set_child(slot, lo);
                node.entries.insert(
                    slot,
                    NodeEntry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                        right: hi,
                    },
                );
            }
            Err(slot) => {
                let child = self.insert(node.child(slot), key, value, level)?;
                node.set_child(slot, Some(child));
            }
        }
        store_node(self.store.as_ref(), &node)
    }

    /// Split the sub-tree at `link` into the keys below and above `key`.
    /// `key` itself must not be present.
    fn split(
        &self,
        link: Option<BlockId>,
        key: &[u8],
    ) -> TreeResult<(Option<BlockId>, Option<BlockId>)> {
        let Some(id) = link else {
            return Ok((None, None));
        };
        let node = load_node(self.store.as_ref(), &id)?;
        let slot = match node.find(key) {
            Ok(_) => {
                return Err(TreeError::CorruptNode {
                    id,
                    reason: "split key found below its own level".into(),
                })
            }
            Err(slot) => slot,
        };
        let (child_lo, child_hi) = self.split(node.child(slot), key)?;

        let lo = if slot == 0 {
            child_lo
        } else {
            let mut lower = Node {
                level: node.level,
                left: node.left,
                entries: node.entries[..slot].to_vec(),
            };
            lower.set_child(slot, child_lo);
            Some(store_node(self.store.as_ref(), &lower)?)
        };
        let hi = if slot == node.entries.len() {
            child_hi
        } else {
            let upper = Node {
                level: node.level,
                left: child_hi,
                entries: node.entries[slot..].to_vec(),
            };
            Some(store_node(self.store.as_ref(), &upper)?)
        };
        Ok((lo, hi))
    }

    /// Returns `None` when `key` is absent, otherwise the new link.
    fn remove(
        &self,
        link: Option<BlockId>,
        key: &[u8],
        level: u32,
    ) -> TreeResult<Option<Option<BlockId>>> {
        let Some(id) = link else {
            return Ok(None);
        };
        let mut node = load_node(self.store.as_ref(), &id)?;
        if node.level < level {
            return Ok(None);
        }

        match node.find(key) {
            Ok(i) => {
                let joined = self.join(node.child(i), node.entries[i].right)?;
                node.entries.remove(i);
                node.set_child(i, joined);
                if node.entries.is_empty() {
                    return Ok(Some(node.left));
                }
            }
            Err(_) if node.level == level => return Ok(None),
            Err(slot) => match self.remove(node.child(slot), key, level)? {
                Some(child) => node.set_child(slot, child),
                None => return Ok(None),
            },
        }
        Ok(Some(Some(store_node(self.store.as_ref(), &node)?)))
    }

    /// Concatenate two sub-trees; every key in `lo` sorts before every key in `hi`.
    fn join(&self, lo: Option<BlockId>, hi: Option<BlockId>) -> TreeResult<Option<BlockId>> {
        let (lo_id, hi_id) = match (lo, hi) {
            (None, other) | (other, None) => return Ok(other),
            (Some(lo_id), Some(hi_id)) => (lo_id, hi_id),
        };
        let mut lo_node = load_node(self.store.as_ref(), &lo_id)?;
        let mut hi_node = load_node(self.store.as_ref(), &hi_id)?;

        let joined = if lo_node.level > hi_node.level {
            let last = lo_node.entries.len();
            let child = self.join(lo_node.child(last), Some(hi_id))?;
            lo_node.set_child(last, child);
            lo_node
        } else if lo_node.level < hi_node.level {
            let child = self.join(Some(lo_id), hi_node.left)?;
            hi_node.left = child;
            hi_node
        } else {
            let last = lo_node.entries.len();
            let middle = self.join(lo_node.child(last), hi_node.left)?;
            lo_node.set_child(last, middle);
            lo_node.entries.append(&mut hi_node.entries);
            lo_node
        };
        Ok(Some(store_node(self.store.as_ref(), &joined)?))
    }

    // -----------------------------------------------------------------------
    // Whole-tree operations
    // -----------------------------------------------------------------------

    /// Keys whose values differ between `left` and `right`, in ascending order.
    pub fn diff(&self, left: Option<BlockId>, right: Option<BlockId>) -> TreeDiff {
        TreeDiff::new(Arc::clone(&self.store), left, right)
    }

    /// Union of two trees; `precedence` picks the winner for conflicting keys.
    pub fn merge(
        &self,
        left: Option<BlockId>,
        right: Option<BlockId>,
        precedence: Precedence,
    ) -> TreeResult<Option<BlockId>> {
        merge_trees(self, left, right, precedence)
    }

    /// Inclusion proof for `key` against `root`.
    pub fn proof(&self, root: Option<BlockId>, key: &[u8]) -> TreeResult<Proof> {
        build_proof(self.store.as_ref(), root, key)
    }

    /// Every node reachable from `root`, children before parents.
    pub fn walk(&self, root: Option<BlockId>) -> TreeResult<Vec<BlockId>> {
        let mut out = Vec::new();
        if let Some(id) = root {
            self.walk_node(id, &mut out)?;
        }
        Ok(out)
    }

    fn walk_node(&self, id: BlockId, out: &mut Vec<BlockId>) -> TreeResult<()> {
        let node = load_node(self.store.as_ref(), &id)?;
        for slot in 0..node.slots() {
            if let Some(child) = node.child(slot) {
                self.walk_node(child, out)?;
            }
        }
        out.push(id);
        Ok(())
    }

    /// Copy every node reachable from `root` into `dest`, children first.
    ///
    /// A node already present in `dest` is skipped together with its
    /// sub-tree, which children-first copying guarantees is present too.
    /// Returns the number of blocks written.
    pub fn copy_reachable(&self, root: Option<BlockId>, dest: &dyn BlockStore) -> TreeResult<u64> {
        let mut copied = 0;
        if let Some(id) = root {
            self.copy_node(id, dest, &mut copied)?;
        }
        Ok(copied)
    }

    fn copy_node(&self, id: BlockId, dest: &dyn BlockStore, copied: &mut u64) -> TreeResult<()> {
        if dest.exists(&id)? {
            return Ok(());
        }
        let block = self.store.get(&id)?;
        block.verify(&id)?;
        let node = Node::decode(&id, &block.data)?;
        for slot in 0..node.slots() {
            if let Some(child) = node.child(slot) {
                self.copy_node(child, dest, copied)?;
            }
        }
        dest.write(&block.data)?;
        *copied += 1;
        Ok(())
    }
}

impl std::fmt::Debug for MerkleSearchTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleSearchTree").finish_non_exhaustive()
    }
}

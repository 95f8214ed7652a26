//! Tree nodes and their canonical encoding.

use serde::{Deserialize, Serialize};
use tessera_store::{Block, BlockStore};
use tessera_types::BlockId;

use crate::error::{TreeError, TreeResult};

/// A key/value pair stored in a node, followed by the link to the sub-tree of
/// keys that sort between this key and the next one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub right: Option<BlockId>,
}

/// A Merkle Search Tree node.
///
/// Every key in a node has the node's level. Child links point at sub-trees
/// whose keys all have a strictly lower level. Slot `0` is `left`, slot `i`
/// is `entries[i - 1].right`; the sub-tree in slot `i` holds the keys between
/// `entries[i - 1].key` and `entries[i].key`.
///
/// A stored node always has at least one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub level: u32,
    pub left: Option<BlockId>,
    pub entries: Vec<NodeEntry>,
}

impl Node {
    /// A node holding a single entry and no children.
    pub fn leaf(level: u32, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            level,
            left: None,
            entries: vec![NodeEntry {
                key,
                value,
                right: None,
            }],
        }
    }

    /// Binary search for `key`: `Ok(i)` if `entries[i]` holds it, otherwise
    /// `Err(slot)` with the child slot whose range covers it.
    pub fn find(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
    }

    /// Number of child slots (`entries.len() + 1`).
    pub fn slots(&self) -> usize {
        self.entries.len() + 1
    }

    /// The child link in `slot`.
    pub fn child(&self, slot: usize) -> Option<BlockId> {
        if slot == 0 {
            self.left
        } else {
            self.entries.get(slot - 1).and_then(|entry| entry.right)
        }
    }

    /// Replace the child link in `slot`.
    pub fn set_child(&mut self, slot: usize, link: Option<BlockId>) {
        if slot == 0 {
            self.left = link;
        } else if let Some(entry) = self.entries.get_mut(slot - 1) {
            entry.right = link;
        }
    }

    /// Canonical byte encoding; the node's id is the block hash of these bytes.
    pub fn encode(&self) -> TreeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TreeError::Encoding(e.to_string()))
    }

    /// The id this node has once stored.
    pub fn id(&self) -> TreeResult<BlockId> {
        Ok(Block::id_for(&self.encode()?))
    }

    /// Decode a node read from block `id`.
    pub fn decode(id: &BlockId, bytes: &[u8]) -> TreeResult<Self> {
        let node: Node = bincode::deserialize(bytes).map_err(|e| TreeError::CorruptNode {
            id: *id,
            reason: e.to_string(),
        })?;
        if node.entries.is_empty() {
            return Err(TreeError::CorruptNode {
                id: *id,
                reason: "node has no entries".into(),
            });
        }
        Ok(node)
    }
}

/// Load and decode the node stored under `id`.
pub(crate) fn load_node(store: &dyn BlockStore, id: &BlockId) -> TreeResult<Node> {
    let block = store.get(id)?;
    Node::decode(id, &block.data)
}

/// Encode and store `node`, returning its id.
pub(crate) fn store_node(store: &dyn BlockStore, node: &Node) -> TreeResult<BlockId> {
    Ok(store.write(&node.encode()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::InMemoryBlockStore;

    fn sample() -> Node {
        Node {
            level: 1,
            left: Some(BlockId::from_hash([1; 32])),
            entries: vec![
                NodeEntry {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                    right: None,
                },
                NodeEntry {
                    key: b"d".to_vec(),
                    value: b"4".to_vec(),
                    right: Some(BlockId::from_hash([2; 32])),
                },
            ],
        }
    }

    #[test]
    fn find_reports_entry_or_slot() {
        let node = sample();
        assert_eq!(node.find(b"b"), Ok(0));
        assert_eq!(node.find(b"a"), Err(0));
        assert_eq!(node.find(b"c"), Err(1));
        assert_eq!(node.find(b"e"), Err(2));
    }

    #[test]
    fn child_slots() {
        let mut node = sample();
        assert_eq!(node.slots(), 3);
        assert_eq!(node.child(0), Some(BlockId::from_hash([1; 32])));
        assert_eq!(node.child(1), None);
        assert_eq!(node.child(2), Some(BlockId::from_hash([2; 32])));
        assert_eq!(node.child(3), None);

        node.set_child(1, Some(BlockId::from_hash([3; 32])));
        assert_eq!(node.entries[0].right, Some(BlockId::from_hash([3; 32])));
    }

    #[test]
    fn encoding_is_stable_and_content_addressed() {
        let store = InMemoryBlockStore::new();
        let node = sample();
        let id = store_node(&store, &node).unwrap();
        assert_eq!(id, node.id().unwrap());
        assert_eq!(load_node(&store, &id).unwrap(), node);
    }

    #[test]
    fn decode_rejects_garbage_and_empty_nodes() {
        let id = BlockId::from_hash([9; 32]);
        assert!(matches!(
            Node::decode(&id, &[0xff, 0x01]),
            Err(TreeError::CorruptNode { .. })
        ));

        let empty = Node {
            level: 0,
            left: None,
            entries: Vec::new(),
        };
        let bytes = empty.encode().unwrap();
        assert!(matches!(
            Node::decode(&id, &bytes),
            Err(TreeError::CorruptNode { .. })
        ));
    }
}

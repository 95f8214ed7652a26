//! Structural diff of two trees.
//!
//! Both trees are flattened lazily into ascending sequences of entries and
//! unexpanded sub-trees. The walk advances the two sequences in lockstep:
//! when both sides are at the same sub-tree id the whole sub-tree is skipped
//! without being read, so the cost is proportional to the changed part.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_store::BlockStore;
use tessera_types::BlockId;

use crate::error::TreeResult;
use crate::node::{load_node, Node};

/// A key whose value differs between the two trees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub key: Vec<u8>,
    /// Value in the left tree, `None` if absent there.
    pub left: Option<Vec<u8>>,
    /// Value in the right tree, `None` if absent there.
    pub right: Option<Vec<u8>>,
}

enum Item {
    Entry(Vec<u8>, Vec<u8>),
    Subtree(BlockId),
}

/// One side of the walk: a stack whose top is the next item in key order.
struct Cursor {
    items: Vec<Item>,
}

impl Cursor {
    fn new(root: Option<BlockId>) -> Self {
        Self {
            items: root.map(Item::Subtree).into_iter().collect(),
        }
    }

    fn peek(&self) -> Option<&Item> {
        self.items.last()
    }

    /// Replace the top sub-tree with its children and entries.
    fn expand(&mut self, node: Node) {
        self.items.pop();
        let mut entries = node.entries;
        while let Some(entry) = entries.pop() {
            if let Some(right) = entry.right {
                self.items.push(Item::Subtree(right));
            }
            self.items.push(Item::Entry(entry.key, entry.value));
        }
        if let Some(left) = node.left {
            self.items.push(Item::Subtree(left));
        }
    }

    fn pop_entry(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        match self.items.pop() {
            Some(Item::Entry(key, value)) => Some((key, value)),
            _ => None,
        }
    }
}

/// Lazy sequence of [`DiffEntry`] in ascending key order.
pub struct TreeDiff {
    store: Arc<dyn BlockStore>,
    left: Cursor,
    right: Cursor,
    done: bool,
}

impl TreeDiff {
    pub(crate) fn new(
        store: Arc<dyn BlockStore>,
        left: Option<BlockId>,
        right: Option<BlockId>,
    ) -> Self {
        Self {
            store,
            left: Cursor::new(left),
            right: Cursor::new(right),
            done: false,
        }
    }

    fn load(&self, id: &BlockId) -> TreeResult<Node> {
        load_node(self.store.as_ref(), id)
    }

    fn step(&mut self) -> TreeResult<Option<DiffEntry>> {
        loop {
            match (self.left.peek(), self.right.peek()) {
                (None, None) => return Ok(None),

                (Some(Item::Subtree(a)), Some(Item::Subtree(b))) if a == b => {
                    self.left.items.pop();
                    self.right.items.pop();
                }

                (Some(Item::Subtree(a)), Some(Item::Subtree(b))) => {
                    let (a, b) = (*a, *b);
                    let a_node = self.load(&a)?;
                    let b_node = self.load(&b)?;
                    if a_node.level > b_node.level {
                        self.left.expand(a_node);
                    } else if a_node.level < b_node.level {
                        self.right.expand(b_node);
                    } else {
                        self.left.expand(a_node);
                        self.right.expand(b_node);
                    }
                }

                (Some(Item::Subtree(a)), _) => {
                    let id = *a;
                    let node = self.load(&id)?;
                    self.left.expand(node);
                }

                (_, Some(Item::Subtree(b))) => {
                    let id = *b;
                    let node = self.load(&id)?;
                    self.right.expand(node);
                }

                (Some(Item::Entry(a_key, a_value)), Some(Item::Entry(b_key, b_value))) => {
                    match a_key.cmp(b_key) {
                        std::cmp::Ordering::Less => {
                            return Ok(self.left.pop_entry().map(|(key, value)| DiffEntry {
                                key,
                                left: Some(value),
                                right: None,
                            }));
                        }
                        std::cmp::Ordering::Greater => {
                            return Ok(self.right.pop_entry().map(|(key, value)| DiffEntry {
                                key,
                                left: None,
                                right: Some(value),
                            }));
                        }
                        std::cmp::Ordering::Equal => {
                            let changed = a_value != b_value;
                            let left = self.left.pop_entry();
                            let right = self.right.pop_entry();
                            if changed {
                                if let (Some((key, a)), Some((_, b))) = (left, right) {
                                    return Ok(Some(DiffEntry {
                                        key,
                                        left: Some(a),
                                        right: Some(b),
                                    }));
                                }
                            }
                        }
                    }
                }

                (Some(Item::Entry(..)), None) => {
                    return Ok(self.left.pop_entry().map(|(key, value)| DiffEntry {
                        key,
                        left: Some(value),
                        right: None,
                    }));
                }

                (None, Some(Item::Entry(..))) => {
                    return Ok(self.right.pop_entry().map(|(key, value)| DiffEntry {
                        key,
                        left: None,
                        right: Some(value),
                    }));
                }
            }
        }
    }
}

impl Iterator for TreeDiff {
    type Item = TreeResult<DiffEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

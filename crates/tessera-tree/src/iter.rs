//! Lazy in-order iteration.

use std::sync::Arc;

use tessera_store::BlockStore;
use tessera_types::BlockId;

use crate::error::TreeResult;
use crate::node::{load_node, Node};

/// A key/value pair yielded by iteration.
pub type Entry = (Vec<u8>, Vec<u8>);

struct Frame {
    node: Node,
    /// Index of the next entry to yield. The child before it is already done.
    pos: usize,
}

/// Ascending iterator over a tree.
///
/// Owns a handle on the store and a root snapshot. Nodes are read only as
/// the caller pulls, and at most one path from the root is held in memory.
/// After an error the iterator yields nothing more.
pub struct TreeIter {
    store: Arc<dyn BlockStore>,
    stack: Vec<Frame>,
    start: Option<(Option<BlockId>, Option<Vec<u8>>)>,
    prefix: Option<Vec<u8>>,
    done: bool,
}

impl TreeIter {
    pub(crate) fn new(
        store: Arc<dyn BlockStore>,
        root: Option<BlockId>,
        from: Option<Vec<u8>>,
        prefix: Option<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            stack: Vec::new(),
            start: Some((root, from)),
            prefix,
            done: false,
        }
    }

    /// Restart iteration at the first key `>= key`, keeping the same root.
    pub fn seek(&mut self, root: Option<BlockId>, key: &[u8]) {
        self.stack.clear();
        self.start = Some((root, Some(key.to_vec())));
        self.done = false;
    }

    fn descend_left(&mut self, mut link: Option<BlockId>) -> TreeResult<()> {
        while let Some(id) = link {
            let node = load_node(self.store.as_ref(), &id)?;
            link = node.left;
            self.stack.push(Frame { node, pos: 0 });
        }
        Ok(())
    }

    fn descend_to(&mut self, mut link: Option<BlockId>, key: &[u8]) -> TreeResult<()> {
        while let Some(id) = link {
            let node = load_node(self.store.as_ref(), &id)?;
            match node.find(key) {
                Ok(i) => {
                    self.stack.push(Frame { node, pos: i });
                    return Ok(());
                }
                Err(slot) => {
                    link = node.child(slot);
                    self.stack.push(Frame { node, pos: slot });
                }
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> TreeResult<Option<Entry>> {
        if let Some((root, from)) = self.start.take() {
            match from {
                Some(key) => self.descend_to(root, &key)?,
                None => self.descend_left(root)?,
            }
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(entry) = frame.node.entries.get(frame.pos) else {
                self.stack.pop();
                continue;
            };
            let item = (entry.key.clone(), entry.value.clone());
            let right = entry.right;
            frame.pos += 1;
            self.descend_left(right)?;
            return Ok(Some(item));
        }
    }
}

impl Iterator for TreeIter {
    type Item = TreeResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some((key, value))) => {
                if let Some(prefix) = &self.prefix {
                    if !key.starts_with(prefix) {
                        self.done = true;
                        return None;
                    }
                }
                Some(Ok((key, value)))
            }
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

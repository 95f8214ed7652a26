//! Tree merge.
//!
//! The merged tree starts as the left root and takes every change the diff
//! reports. Sub-trees equal on both sides are never visited, and everything
//! the right tree does not touch keeps its left-side nodes.

use serde::{Deserialize, Serialize};
use tessera_types::BlockId;
use tracing::debug;

use crate::error::TreeResult;
use crate::tree::MerkleSearchTree;

/// Which side wins when a key holds different values in the two trees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precedence {
    Left,
    #[default]
    Right,
}

pub(crate) fn merge_trees(
    tree: &MerkleSearchTree,
    left: Option<BlockId>,
    right: Option<BlockId>,
    precedence: Precedence,
) -> TreeResult<Option<BlockId>> {
    if left == right {
        return Ok(left);
    }
    let mut root = left;
    let mut applied = 0usize;
    for change in tree.diff(left, right) {
        let change = change?;
        let take = match (&change.left, &change.right) {
            (_, None) => None,
            (None, Some(value)) => Some(value),
            (Some(_), Some(value)) => match precedence {
                Precedence::Right => Some(value),
                Precedence::Left => None,
            },
        };
        if let Some(value) = take {
            root = Some(tree.put(root, &change.key, value)?);
            applied += 1;
        }
    }
    debug!(applied, ?precedence, "merged trees");
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use proptest::prelude::*;
    use tessera_store::InMemoryBlockStore;

    fn engine() -> MerkleSearchTree {
        MerkleSearchTree::new(Arc::new(InMemoryBlockStore::new()))
    }

    fn contents(tree: &MerkleSearchTree, root: Option<BlockId>) -> BTreeMap<Vec<u8>, Vec<u8>> {
        tree.iter(root).map(|e| e.unwrap()).collect()
    }

    fn build(tree: &MerkleSearchTree, pairs: &[(&str, &str)]) -> Option<BlockId> {
        tree.build(
            pairs
                .iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec())),
        )
        .unwrap()
    }

    #[test]
    fn default_precedence_is_right() {
        assert_eq!(Precedence::default(), Precedence::Right);
    }

    #[test]
    fn merge_with_itself_is_identity() {
        let tree = engine();
        let root = build(&tree, &[("a", "1"), ("b", "2")]);
        assert_eq!(tree.merge(root, root, Precedence::Right).unwrap(), root);
    }

    #[test]
    fn merge_with_empty() {
        let tree = engine();
        let root = build(&tree, &[("a", "1"), ("b", "2")]);
        assert_eq!(tree.merge(root, None, Precedence::Right).unwrap(), root);
        assert_eq!(tree.merge(None, root, Precedence::Right).unwrap(), root);
    }

    #[test]
    fn conflicts_follow_precedence() {
        let tree = engine();
        let left = build(&tree, &[("a", "left"), ("b", "only-left")]);
        let right = build(&tree, &[("a", "right"), ("c", "only-right")]);

        let right_wins = contents(&tree, tree.merge(left, right, Precedence::Right).unwrap());
        assert_eq!(right_wins[b"a".as_slice()], b"right");
        assert_eq!(right_wins.len(), 3);

        let left_wins = contents(&tree, tree.merge(left, right, Precedence::Left).unwrap());
        assert_eq!(left_wins[b"a".as_slice()], b"left");
        assert_eq!(left_wins.len(), 3);
    }

    #[test]
    fn merged_root_is_canonical() {
        let tree = engine();
        let left = build(&tree, &[("a", "1"), ("c", "3")]);
        let right = build(&tree, &[("b", "2"), ("d", "4")]);
        let merged = tree.merge(left, right, Precedence::Right).unwrap();
        let expected = build(&tree, &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        assert_eq!(merged, expected);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn merge_is_union_with_right_winning(
            a in proptest::collection::btree_map(any::<u8>(), any::<u8>(), 0..100),
            b in proptest::collection::btree_map(any::<u8>(), any::<u8>(), 0..100),
        ) {
            let tree = engine();
            let a: BTreeMap<Vec<u8>, Vec<u8>> = a.into_iter().map(|(k, v)| (vec![k], vec![v])).collect();
            let b: BTreeMap<Vec<u8>, Vec<u8>> = b.into_iter().map(|(k, v)| (vec![k], vec![v])).collect();
            let ra = tree.build(a.clone()).unwrap();
            let rb = tree.build(b.clone()).unwrap();

            let mut expected = a.clone();
            expected.extend(b.clone());
            let merged = tree.merge(ra, rb, Precedence::Right).unwrap();
            prop_assert_eq!(contents(&tree, merged), expected.clone());
            prop_assert_eq!(merged, tree.build(expected).unwrap());
        }
    }
}

//! Database merge.
//!
//! Both database trees are copied into a fresh store, where shared sub-trees
//! land once, and merged with the tree-level diff merge. Index trees are not
//! merged: every index of every collection is rebuilt from the merged
//! documents.

use std::sync::Arc;

use tessera_store::InMemoryBlockStore;
use tessera_tree::{MerkleSearchTree, Precedence};
use tracing::info;

use crate::collection::{list_collections, read_collection_meta};
use crate::database::Database;
use crate::error::{DbError, DbResult};

pub(crate) fn merge_databases(
    left: &Database,
    right: &Database,
    precedence: Precedence,
) -> DbResult<Database> {
    if left.in_session() || right.in_session() {
        return Err(DbError::SessionActive);
    }
    let left_meta = left.meta_info()?;
    let right_meta = right.meta_info()?;
    if left_meta.format != right_meta.format {
        return Err(DbError::IncompatibleDatabase(format!(
            "cannot merge format {:?} with {:?}",
            left_meta.format, right_meta.format
        )));
    }

    let (left_root, right_root) = (left.root(), right.root());
    let (left_tree, right_tree) = (&left.inner().tree, &right.inner().tree);
    for name in list_collections(right_tree, right_root)? {
        let theirs = read_collection_meta(right_tree, right_root, &name)?;
        let ours = read_collection_meta(left_tree, left_root, &name)?;
        if let (Some(ours), Some(theirs)) = (ours, theirs) {
            if ours.primary_key != theirs.primary_key {
                return Err(DbError::SchemaMismatch {
                    collection: name,
                    reason: format!(
                        "primary keys differ: {:?} and {:?}",
                        ours.primary_key, theirs.primary_key
                    ),
                });
            }
        }
    }

    let store = Arc::new(InMemoryBlockStore::new());
    let copied = left_tree.copy_reachable(left_root, store.as_ref())?
        + right_tree.copy_reachable(right_root, store.as_ref())?;
    let tree = MerkleSearchTree::new(store.clone());
    let root = tree.merge(left_root, right_root, precedence)?;

    let merged = Database::from_parts(store, left.config().clone(), root);
    let mut rebuilt = 0;
    for name in merged.collection_names()? {
        rebuilt += merged.existing_collection(&name)?.rebuild_indexes()?;
    }
    info!(
        ?precedence,
        blocks = copied,
        indexes = rebuilt,
        root = ?merged.root(),
        "merged databases"
    );
    Ok(merged)
}

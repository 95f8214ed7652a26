//! Merkle Search Tree for Tessera.
//!
//! An ordered key/value map whose nodes are content-addressed blocks. Each
//! key's level is derived from its hash, so a key set has exactly one tree
//! shape and one root hash, whatever the order of updates. That property is
//! what makes the rest of the engine work:
//!
//! - [`MerkleSearchTree`] -- get, put, delete, canonical bulk `build`
//! - [`TreeIter`] -- lazy ascending iteration, seekable, prefix-bounded
//! - [`TreeDiff`] / [`DiffEntry`] -- lockstep diff that skips shared sub-trees
//! - [`Precedence`] -- conflict rule for [`MerkleSearchTree::merge`]
//! - [`Proof`] / [`Verification`] -- inclusion proofs and their checker
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_store::InMemoryBlockStore;
//! use tessera_tree::MerkleSearchTree;
//!
//! let tree = MerkleSearchTree::new(Arc::new(InMemoryBlockStore::new()));
//! let root = tree.put(None, b"alice", b"1").unwrap();
//! let root = tree.put(Some(root), b"bob", b"2").unwrap();
//!
//! let proof = tree.proof(Some(root), b"bob").unwrap();
//! assert!(proof.verify(&root));
//! ```

pub mod diff;
pub mod error;
pub mod iter;
pub mod merge;
pub mod node;
pub mod proof;
pub mod tree;

pub use diff::{DiffEntry, TreeDiff};
pub use error::{TreeError, TreeResult};
pub use iter::{Entry, TreeIter};
pub use merge::Precedence;
pub use node::{Node, NodeEntry};
pub use proof::{Proof, ProofStep, Verification};
pub use tree::MerkleSearchTree;

//! Inclusion proofs.
//!
//! A proof carries the nodes on the path from the node holding a key up to
//! the root. Each ancestor has a hole where the link to the step below used
//! to be; the verifier fills it with the hash it recomputed for that step.
//! Nothing outside the path is revealed.

use serde::{Deserialize, Serialize};
use tessera_crypto::key_level;
use tessera_store::BlockStore;
use tessera_types::BlockId;

use crate::error::{TreeError, TreeResult};
use crate::node::{load_node, Node};

/// One node on a proof path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub node: Node,
    /// In the first step, the index of the proven entry. In later steps, the
    /// child slot that leads to the previous step.
    pub slot: usize,
}

/// Evidence that `key` maps to `value` in the tree with root `root`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Holding node first, root last.
    pub steps: Vec<ProofStep>,
    /// The root this proof claims to be relative to.
    pub root: BlockId,
}

/// Outcome of checking a proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    /// The path is sound but ends at a different root.
    RootMismatch { expected: BlockId, actual: BlockId },
    /// The proof is internally inconsistent.
    Malformed(String),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl Proof {
    /// Check this proof against `expected_root`.
    ///
    /// Never panics, whatever the proof contains.
    pub fn check(&self, expected_root: &BlockId) -> Verification {
        let computed = match self.recompute() {
            Ok(computed) => computed,
            Err(reason) => return Verification::Malformed(reason),
        };
        if computed != self.root {
            return Verification::Malformed("path does not hash to the asserted root".into());
        }
        if self.root != *expected_root {
            return Verification::RootMismatch {
                expected: *expected_root,
                actual: self.root,
            };
        }
        Verification::Valid
    }

    /// `true` if the proof checks out against `expected_root`.
    pub fn verify(&self, expected_root: &BlockId) -> bool {
        self.check(expected_root).is_valid()
    }

    fn recompute(&self) -> Result<BlockId, String> {
        let (first, ancestors) = self.steps.split_first().ok_or("proof has no steps")?;

        well_formed(&first.node)?;
        let entry = first
            .node
            .entries
            .get(first.slot)
            .ok_or("entry index out of bounds")?;
        if entry.key != self.key {
            return Err("holding node does not contain the proven key".into());
        }
        if entry.value != self.value {
            return Err("holding node does not contain the proven value".into());
        }
        let mut hash = first.node.id().map_err(|e| e.to_string())?;
        let mut level = first.node.level;

        for step in ancestors {
            let node = &step.node;
            well_formed(node)?;
            if node.level <= level {
                return Err(format!(
                    "ancestor level {} is not above level {level}",
                    node.level
                ));
            }
            if step.slot >= node.slots() {
                return Err("child slot out of bounds".into());
            }
            if node.child(step.slot).is_some() {
                return Err("ancestor link on the path is not empty".into());
            }
            if step.slot > 0 && node.entries[step.slot - 1].key >= self.key {
                return Err("proven key sorts before the ancestor gap".into());
            }
            if let Some(next) = node.entries.get(step.slot) {
                if next.key <= self.key {
                    return Err("proven key sorts after the ancestor gap".into());
                }
            }

            let mut filled = node.clone();
            filled.set_child(step.slot, Some(hash));
            hash = filled.id().map_err(|e| e.to_string())?;
            level = node.level;
        }
        Ok(hash)
    }
}

fn well_formed(node: &Node) -> Result<(), String> {
    if node.entries.is_empty() {
        return Err("node has no entries".into());
    }
    for pair in node.entries.windows(2) {
        if pair[0].key >= pair[1].key {
            return Err("node keys are not strictly increasing".into());
        }
    }
    if node.entries.iter().any(|e| key_level(&e.key) != node.level) {
        return Err(format!("node holds a key that does not belong to level {}", node.level));
    }
    Ok(())
}

pub(crate) fn build_proof(
    store: &dyn BlockStore,
    root: Option<BlockId>,
    key: &[u8],
) -> TreeResult<Proof> {
    let root_id = root.ok_or_else(|| TreeError::KeyNotFound(key.to_vec()))?;
    let mut ancestors: Vec<ProofStep> = Vec::new();
    let mut link = Some(root_id);

    while let Some(id) = link {
        let node = load_node(store, &id)?;
        match node.find(key) {
            Ok(i) => {
                let value = node.entries[i].value.clone();
                let mut steps = Vec::with_capacity(ancestors.len() + 1);
                steps.push(ProofStep { node, slot: i });
                steps.extend(ancestors.into_iter().rev());
                return Ok(Proof {
                    key: key.to_vec(),
                    value,
                    steps,
                    root: root_id,
                });
            }
            Err(slot) => {
                link = node.child(slot);
                let mut holed = node;
                holed.set_child(slot, None);
                ancestors.push(ProofStep { node: holed, slot });
            }
        }
    }
    Err(TreeError::KeyNotFound(key.to_vec()))
}

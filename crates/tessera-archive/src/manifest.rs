use serde::{Deserialize, Serialize};
use tessera_types::BlockId;

use crate::error::{ArchiveError, ArchiveResult};

/// What an archive is a snapshot of.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Root of the archived tree; `None` for an empty database.
    pub root: Option<BlockId>,
    /// Opaque metadata owned by the writer's caller.
    pub metadata: Vec<u8>,
    pub block_count: u64,
}

impl ArchiveManifest {
    pub fn to_bytes(&self) -> ArchiveResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ArchiveError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> ArchiveResult<Self> {
        bincode::deserialize(data).map_err(|e| ArchiveError::Serialization(e.to_string()))
    }
}

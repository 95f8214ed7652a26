//! Fixed, versioned metadata records stored in the database tree.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

pub const CURRENT_DB_VERSION: i64 = 1;
pub const CURRENT_COLLECTION_VERSION: i64 = 1;
pub const CURRENT_INDEX_VERSION: i64 = 1;
/// Format name of a Tessera database.
pub const DB_FORMAT: &str = "database";

/// A metadata record with a stable binary encoding.
///
/// Both directions are total: malformed bytes are a [`DbError::Decode`],
/// never a panic.
pub trait MetaRecord: Sized {
    fn encode(&self) -> DbResult<Vec<u8>>;
    fn decode(bytes: &[u8]) -> DbResult<Self>;
}

impl<T: Serialize + DeserializeOwned> MetaRecord for T {
    fn encode(&self) -> DbResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| DbError::Encode(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> DbResult<Self> {
        bincode::deserialize(bytes).map_err(|e| DbError::Decode(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMetaInfo {
    pub version: i64,
    pub format: String,
}

impl DbMetaInfo {
    pub fn current(format: &str) -> Self {
        Self {
            version: CURRENT_DB_VERSION,
            format: format.to_string(),
        }
    }

    /// Whether a database with this metadata can be opened as `format`.
    pub fn check_compatible(&self, format: &str) -> DbResult<()> {
        if self.format != format {
            return Err(DbError::IncompatibleDatabase(format!(
                "format {:?}, expected {format:?}",
                self.format
            )));
        }
        if self.version > CURRENT_DB_VERSION || self.version < 1 {
            return Err(DbError::IncompatibleDatabase(format!(
                "version {} is not supported (current {CURRENT_DB_VERSION})",
                self.version
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetaInfo {
    pub version: i64,
    pub primary_key: Vec<String>,
}

impl CollectionMetaInfo {
    pub fn current(primary_key: Vec<String>) -> Self {
        Self {
            version: CURRENT_COLLECTION_VERSION,
            primary_key,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetaInfo {
    pub version: i64,
}

impl Default for IndexMetaInfo {
    fn default() -> Self {
        Self {
            version: CURRENT_INDEX_VERSION,
        }
    }
}

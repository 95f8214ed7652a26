use serde::{Deserialize, Serialize};

use crate::schema::DB_FORMAT;

/// Database settings.
///
/// Every field has a default, so partial configuration files deserialize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Format name recorded in the database metadata and required on import.
    pub format: String,
    /// zstd level used for archive blocks.
    pub compression_level: i32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            format: DB_FORMAT.to_string(),
            compression_level: 3,
        }
    }
}

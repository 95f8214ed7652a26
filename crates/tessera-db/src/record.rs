use std::fmt;

use serde_json::Value;

use crate::error::{DbError, DbResult};

/// Primary key of a document.
///
/// The canonical JSON encoding of the key field's value, or of the array of
/// values for a composite key. Record ids therefore sort by their encoding.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(Vec<u8>);

impl RecordId {
    /// Extract the record id of `document` under `primary_key`.
    pub fn from_document(document: &Value, primary_key: &[String]) -> DbResult<Self> {
        let mut values = Vec::with_capacity(primary_key.len());
        for field in primary_key {
            let value = document
                .get(field)
                .ok_or_else(|| DbError::MissingPrimaryKey {
                    field: field.clone(),
                })?;
            values.push(value.clone());
        }
        match values.len() {
            1 => Self::single(&values[0]),
            _ => Self::composite(values),
        }
    }

    /// Id for a single-field primary key.
    pub fn single(value: &Value) -> DbResult<Self> {
        Ok(Self(serde_json::to_vec(value)?))
    }

    /// Id for a composite primary key, values in key-field order.
    pub fn composite(values: Vec<Value>) -> DbResult<Self> {
        Ok(Self(serde_json::to_vec(&Value::Array(values))?))
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key value this id encodes.
    pub fn to_value(&self) -> DbResult<Value> {
        serde_json::from_slice(&self.0).map_err(|e| DbError::Decode(e.to_string()))
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        // A JSON string encoding cannot fail.
        Self(serde_json::to_vec(value).unwrap_or_default())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({self})")
    }
}

/// A document and its record id, returned by value.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentRecord {
    pub id: RecordId,
    pub data: Value,
}

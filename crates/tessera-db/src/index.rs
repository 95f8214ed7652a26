//! Secondary indexes.
//!
//! An index is its own tree in the database's block store, mapping
//! `seg(json(v1)) .. seg(json(vn)) ‖ record-id` to an empty value. Its
//! definition and root pointer live in the database tree next to the
//! collection's documents.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tessera_tree::MerkleSearchTree;
use tessera_types::BlockId;

use crate::database::DbInner;
use crate::error::{DbError, DbResult};
use crate::keys;
use crate::record::RecordId;
use crate::session::Session;

/// Handle on one index of a collection.
#[derive(Clone)]
pub struct Index {
    db: Arc<DbInner>,
    collection: String,
    fields: Vec<String>,
}

impl Index {
    pub(crate) fn new(db: Arc<DbInner>, collection: String, fields: Vec<String>) -> Self {
        Self {
            db,
            collection,
            fields,
        }
    }

    /// Indexed fields, sorted.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether the index has been created.
    pub fn exists(&self) -> DbResult<bool> {
        let snapshot = self.db.snapshot();
        let key = keys::index_meta(&self.collection, &self.fields);
        Ok(self.db.tree.contains(snapshot.root, &key)?)
    }

    /// Record ids whose documents hold `values`, in ascending order.
    ///
    /// `values` follow the order of [`Index::fields`].
    pub fn lookup(&self, values: &[Value]) -> DbResult<Vec<RecordId>> {
        let snapshot = self.db.snapshot();
        let refs: Vec<&Value> = values.iter().collect();
        lookup_at(&self.db.tree, &snapshot, &self.collection, &self.fields, &refs)
    }

    /// Number of indexed documents.
    pub fn len(&self) -> DbResult<usize> {
        Ok(self.db.tree.len(self.root()?)?)
    }

    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.root()?.is_none())
    }

    /// Current root of the index tree; `None` while the index is empty.
    pub fn root(&self) -> DbResult<Option<BlockId>> {
        let snapshot = self.db.snapshot();
        snapshot.index_root(
            &self.db.tree,
            &keys::index_root(&self.collection, &self.fields),
        )
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("collection", &self.collection)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Sort and de-duplicate an index definition.
pub(crate) fn normalize_fields<S: AsRef<str>>(fields: &[S]) -> DbResult<Vec<String>> {
    let mut fields: Vec<String> = fields.iter().map(|f| f.as_ref().to_string()).collect();
    fields.sort();
    fields.dedup();
    if fields.is_empty() {
        return Err(DbError::InvalidIndex("an index needs at least one field".into()));
    }
    Ok(fields)
}

/// Field lists of every index defined on `collection`.
pub(crate) fn list_indexes(
    tree: &MerkleSearchTree,
    root: Option<BlockId>,
    collection: &str,
) -> DbResult<Vec<Vec<String>>> {
    let prefix = keys::index_prefix(collection);
    let mut out = Vec::new();
    for entry in tree.iter_prefix(root, &prefix) {
        let (key, _) = entry?;
        let malformed = || DbError::Decode("malformed index key".into());
        let (fields, rest) = keys::read_segment(&key[prefix.len()..]).ok_or_else(malformed)?;
        let (tag, _) = keys::read_segment(rest).ok_or_else(malformed)?;
        if tag == b"meta" {
            out.push(keys::decode_fields(&fields)?);
        }
    }
    Ok(out)
}

/// Index tree key of `document`, or `None` if it lacks an indexed field.
pub(crate) fn entry_key(
    fields: &[String],
    document: &Value,
    record_id: &RecordId,
) -> DbResult<Option<Vec<u8>>> {
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        match document.get(field) {
            Some(value) => values.push(value),
            None => return Ok(None),
        }
    }
    let mut key = keys::index_entry_prefix(&values)?;
    key.extend_from_slice(record_id.as_bytes());
    Ok(Some(key))
}

pub(crate) fn lookup_at(
    tree: &MerkleSearchTree,
    snapshot: &Session,
    collection: &str,
    fields: &[String],
    values: &[&Value],
) -> DbResult<Vec<RecordId>> {
    if values.len() != fields.len() {
        return Err(DbError::InvalidIndex(format!(
            "index on {fields:?} takes {} values, got {}",
            fields.len(),
            values.len()
        )));
    }
    let root = snapshot.index_root(tree, &keys::index_root(collection, fields))?;
    let prefix = keys::index_entry_prefix(values)?;
    tree.iter_prefix(root, &prefix)
        .map(|entry| {
            let (key, _) = entry?;
            Ok(RecordId::from_bytes(key[prefix.len()..].to_vec()))
        })
        .collect()
}

/// Build an index tree from every document of `collection` under `root`.
pub(crate) fn build_index(
    tree: &MerkleSearchTree,
    root: Option<BlockId>,
    collection: &str,
    fields: &[String],
) -> DbResult<Option<BlockId>> {
    let prefix = keys::doc_prefix(collection);
    let mut entries = Vec::new();
    for entry in tree.iter_prefix(root, &prefix) {
        let (key, value) = entry?;
        let record_id = RecordId::from_bytes(key[prefix.len()..].to_vec());
        let document: Value = serde_json::from_slice(&value)?;
        if let Some(index_key) = entry_key(fields, &document, &record_id)? {
            entries.push((index_key, Vec::new()));
        }
    }
    Ok(tree.build(entries)?)
}

/// Move one document's entry within an index, buffering the new root in
/// `session`.
pub(crate) fn update_entry(
    tree: &MerkleSearchTree,
    session: &mut Session,
    collection: &str,
    fields: &[String],
    record_id: &RecordId,
    old: Option<&Value>,
    new: Option<&Value>,
) -> DbResult<()> {
    let old_key = match old {
        Some(doc) => entry_key(fields, doc, record_id)?,
        None => None,
    };
    let new_key = match new {
        Some(doc) => entry_key(fields, doc, record_id)?,
        None => None,
    };
    if old_key == new_key {
        return Ok(());
    }

    let pointer = keys::index_root(collection, fields);
    let mut root = session.index_root(tree, &pointer)?;
    if let Some(key) = old_key {
        root = tree.delete(root, &key)?;
    }
    if let Some(key) = new_key {
        root = Some(tree.put(root, &key, &[])?);
    }
    session.index_roots.insert(pointer, root);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::database::Database;

    fn people() -> (Database, crate::collection::Collection) {
        let db = Database::in_memory().unwrap();
        let col = db.collection("people", "name").unwrap();
        col.index_stream(
            [
                json!({"name": "Alice", "city": "Oslo", "age": 30}),
                json!({"name": "Bob", "city": "Rome", "age": 30}),
                json!({"name": "Albert", "city": "Oslo"}),
                json!({"name": "Carol"}),
            ]
            .into_iter()
            .map(Ok),
        )
        .unwrap();
        (db, col)
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_fields(&["b", "a", "b"]).unwrap(), vec!["a", "b"]);
        let none: [&str; 0] = [];
        assert!(matches!(normalize_fields(&none), Err(DbError::InvalidIndex(_))));
    }

    #[test]
    fn lookup_is_ascending_by_record_id() {
        let (_db, col) = people();
        let index = col.create_index(&["city"]).unwrap();
        assert!(index.exists().unwrap());
        let oslo = index.lookup(&[json!("Oslo")]).unwrap();
        assert_eq!(oslo, vec![RecordId::from("Albert"), RecordId::from("Alice")]);
        assert!(index.lookup(&[json!("Paris")]).unwrap().is_empty());
    }

    #[test]
    fn documents_missing_a_field_are_not_indexed() {
        let (db, col) = people();
        let index = col.create_index(&["age", "city"]).unwrap();
        assert_eq!(index.fields(), ["age", "city"]);
        let hits = index.lookup(&[json!(30), json!("Oslo")]).unwrap();
        assert_eq!(hits, vec![RecordId::from("Alice")]);
        let root = index.root().unwrap();
        assert_eq!(db.inner().tree.len(root).unwrap(), 2);
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn writes_move_entries() {
        let (_db, col) = people();
        let index = col.create_index(&["city"]).unwrap();
        col.index_stream([Ok(json!({"name": "Alice", "city": "Rome"}))])
            .unwrap();
        assert_eq!(index.lookup(&[json!("Oslo")]).unwrap(), vec![RecordId::from("Albert")]);
        assert_eq!(
            index.lookup(&[json!("Rome")]).unwrap(),
            vec![RecordId::from("Alice"), RecordId::from("Bob")]
        );

        assert!(col.remove(&RecordId::from("Bob")).unwrap());
        assert_eq!(index.lookup(&[json!("Rome")]).unwrap(), vec![RecordId::from("Alice")]);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let (_db, col) = people();
        let index = col.create_index(&["city"]).unwrap();
        assert!(matches!(
            index.lookup(&[json!("Oslo"), json!(1)]),
            Err(DbError::InvalidIndex(_))
        ));
    }

    #[test]
    fn undefined_index_is_empty() {
        let (_db, col) = people();
        let index = col.index(&["nickname"]).unwrap();
        assert!(!index.exists().unwrap());
        assert!(index.lookup(&[json!("x")]).unwrap().is_empty());
        assert_eq!(index.root().unwrap(), None);
    }
}

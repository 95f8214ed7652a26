//! Collections: documents keyed by a primary key, plus their indexes.

use std::fmt;
use std::io::BufRead;
use std::sync::Arc;

use serde_json::Value;
use tessera_tree::{MerkleSearchTree, Proof, TreeError};
use tessera_types::BlockId;
use tracing::debug;

use crate::database::DbInner;
use crate::error::{DbError, DbResult};
use crate::index::{build_index, list_indexes, normalize_fields, update_entry, Index};
use crate::keys;
use crate::ndjson::NdjsonSource;
use crate::query::{self, Query, QueryPlan};
use crate::record::{DocumentRecord, RecordId};
use crate::schema::{CollectionMetaInfo, IndexMetaInfo, MetaRecord};
use crate::session::Session;

/// Lazy stream of documents. Dropping it stops the walk.
pub type Documents = Box<dyn Iterator<Item = DbResult<DocumentRecord>> + Send>;

/// Handle on a named collection.
///
/// Cheap to clone. Reads see the database's current working state; every
/// write is one all-or-nothing mutation.
#[derive(Clone)]
pub struct Collection {
    db: Arc<DbInner>,
    name: String,
    primary_key: Vec<String>,
}

impl Collection {
    pub(crate) fn new(db: Arc<DbInner>, name: String, primary_key: Vec<String>) -> Self {
        Self {
            db,
            name,
            primary_key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace every document of `documents`.
    ///
    /// Each item must be a JSON object holding all primary key fields. The
    /// first failing item aborts the call and nothing it wrote is kept.
    /// Returns the number of documents written.
    pub fn index_stream<I>(&self, documents: I) -> DbResult<usize>
    where
        I: IntoIterator<Item = DbResult<Value>>,
    {
        let tree = &self.db.tree;
        self.db.mutate(|session| {
            self.ensure_catalog(session)?;
            let indexes = list_indexes(tree, session.root, &self.name)?;
            let mut count = 0;
            for (position, document) in documents.into_iter().enumerate() {
                let document = document?;
                if !document.is_object() {
                    return Err(DbError::InvalidDocument {
                        line: position + 1,
                        reason: "not a JSON object".into(),
                    });
                }
                let record_id = RecordId::from_document(&document, &self.primary_key)?;
                self.write(session, &indexes, &record_id, Some(&document))?;
                count += 1;
            }
            debug!(collection = %self.name, count, "indexed documents");
            Ok(count)
        })
    }

    /// [`Collection::index_stream`] over newline-delimited JSON.
    pub fn index_ndjson<R: BufRead>(&self, reader: R) -> DbResult<usize> {
        self.index_stream(NdjsonSource::new(reader))
    }

    /// Delete a document and its index entries. Returns whether it existed.
    pub fn remove(&self, id: &RecordId) -> DbResult<bool> {
        let tree = &self.db.tree;
        self.db.mutate(|session| {
            let indexes = list_indexes(tree, session.root, &self.name)?;
            self.write(session, &indexes, id, None)
        })
    }

    fn ensure_catalog(&self, session: &mut Session) -> DbResult<()> {
        let tree = &self.db.tree;
        if read_collection_meta(tree, session.root, &self.name)?.is_none() {
            let meta = CollectionMetaInfo::current(self.primary_key.clone()).encode()?;
            session.root = Some(tree.put(session.root, &keys::catalog(&self.name), &meta)?);
        }
        Ok(())
    }

    /// Replace the document stored under `id` with `new` (or delete it) and
    /// move its entries in every index.
    fn write(
        &self,
        session: &mut Session,
        indexes: &[Vec<String>],
        id: &RecordId,
        new: Option<&Value>,
    ) -> DbResult<bool> {
        let tree = &self.db.tree;
        let key = keys::doc(&self.name, id.as_bytes());
        let old: Option<Value> = match tree.get(session.root, &key)? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };
        match new {
            Some(document) => {
                let bytes = serde_json::to_vec(document)?;
                session.root = Some(tree.put(session.root, &key, &bytes)?);
            }
            None if old.is_some() => session.root = tree.delete(session.root, &key)?,
            None => return Ok(false),
        }
        for fields in indexes {
            update_entry(tree, session, &self.name, fields, id, old.as_ref(), new)?;
        }
        Ok(old.is_some())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &RecordId) -> DbResult<DocumentRecord> {
        let snapshot = self.db.snapshot();
        fetch(&self.db.tree, snapshot.root, &self.name, id.clone())?
            .ok_or_else(|| DbError::NotFound(format!("record {id} in {}", self.name)))
    }

    /// Every document in ascending record id order.
    pub fn iterate(&self) -> Documents {
        let snapshot = self.db.snapshot();
        documents(&self.db.tree, snapshot.root, &self.name, None)
    }

    /// Documents with record id `>= start`, in ascending order.
    ///
    /// Resumes an earlier [`Collection::iterate`] from the last id it
    /// yielded, against the current state of the collection.
    pub fn iterate_from(&self, start: &RecordId) -> Documents {
        let snapshot = self.db.snapshot();
        documents(&self.db.tree, snapshot.root, &self.name, Some(start))
    }

    pub fn count(&self) -> DbResult<usize> {
        let snapshot = self.db.snapshot();
        let prefix = keys::doc_prefix(&self.name);
        let mut count = 0;
        for entry in self.db.tree.iter_prefix(snapshot.root, &prefix) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Documents matching `query`, in ascending record id order.
    pub fn search(&self, query: &Query) -> DbResult<Documents> {
        query::execute(&self.db.tree, self.db.snapshot(), &self.name, query)
    }

    /// The plan [`Collection::search`] would use for `query`.
    pub fn explain(&self, query: &Query) -> DbResult<QueryPlan> {
        let snapshot = self.db.snapshot();
        let available = list_indexes(&self.db.tree, snapshot.root, &self.name)?;
        Ok(query::plan(query, &available))
    }

    /// Inclusion proof of the document stored under `id`, relative to
    /// [`Collection::root`].
    ///
    /// During an explicit session that root is the session's working root,
    /// which `flush` replaces once buffered index roots are written. Take
    /// proofs after flushing when they must verify against a durable root.
    pub fn get_proof(&self, id: &RecordId) -> DbResult<Proof> {
        let snapshot = self.db.snapshot();
        let key = keys::doc(&self.name, id.as_bytes());
        self.db
            .tree
            .proof(snapshot.root, &key)
            .map_err(|e| match e {
                TreeError::KeyNotFound(_) => {
                    DbError::NotFound(format!("record {id} in {}", self.name))
                }
                other => other.into(),
            })
    }

    /// Root of the database tree as this handle sees it.
    pub fn root(&self) -> Option<BlockId> {
        self.db.snapshot().root
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    /// Create an index on `fields`, or return the existing one.
    ///
    /// A new index is built from one scan of the collection.
    pub fn create_index<S: AsRef<str>>(&self, fields: &[S]) -> DbResult<Index> {
        let fields = normalize_fields(fields)?;
        let tree = &self.db.tree;
        self.db.mutate(|session| {
            let meta_key = keys::index_meta(&self.name, &fields);
            if tree.contains(session.root, &meta_key)? {
                return Ok(());
            }
            self.ensure_catalog(session)?;
            let meta = IndexMetaInfo::default().encode()?;
            session.root = Some(tree.put(session.root, &meta_key, &meta)?);
            let root = build_index(tree, session.root, &self.name, &fields)?;
            session
                .index_roots
                .insert(keys::index_root(&self.name, &fields), root);
            debug!(collection = %self.name, ?fields, ?root, "created index");
            Ok(())
        })?;
        Ok(self.handle(fields))
    }

    /// Handle on the index over `fields`, whether or not it exists.
    pub fn index<S: AsRef<str>>(&self, fields: &[S]) -> DbResult<Index> {
        Ok(self.handle(normalize_fields(fields)?))
    }

    pub fn indexes(&self) -> DbResult<Vec<Index>> {
        let snapshot = self.db.snapshot();
        Ok(list_indexes(&self.db.tree, snapshot.root, &self.name)?
            .into_iter()
            .map(|fields| self.handle(fields))
            .collect())
    }

    /// Rebuild every index from the stored documents.
    pub(crate) fn rebuild_indexes(&self) -> DbResult<usize> {
        let tree = &self.db.tree;
        self.db.mutate(|session| {
            let indexes = list_indexes(tree, session.root, &self.name)?;
            for fields in &indexes {
                let root = build_index(tree, session.root, &self.name, fields)?;
                session
                    .index_roots
                    .insert(keys::index_root(&self.name, fields), root);
            }
            debug!(collection = %self.name, count = indexes.len(), "rebuilt indexes");
            Ok(indexes.len())
        })
    }

    fn handle(&self, fields: Vec<String>) -> Index {
        Index::new(Arc::clone(&self.db), self.name.clone(), fields)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

pub(crate) fn read_collection_meta(
    tree: &MerkleSearchTree,
    root: Option<BlockId>,
    name: &str,
) -> DbResult<Option<CollectionMetaInfo>> {
    tree.get(root, &keys::catalog(name))?
        .map(|bytes| CollectionMetaInfo::decode(&bytes))
        .transpose()
}

pub(crate) fn list_collections(
    tree: &MerkleSearchTree,
    root: Option<BlockId>,
) -> DbResult<Vec<String>> {
    let prefix = keys::catalog_prefix();
    let mut names = Vec::new();
    for entry in tree.iter_prefix(root, &prefix) {
        let (key, _) = entry?;
        let (name, _) = keys::read_segment(&key[prefix.len()..])
            .ok_or_else(|| DbError::Decode("malformed catalog key".into()))?;
        let name = String::from_utf8(name)
            .map_err(|_| DbError::Decode("collection name is not UTF-8".into()))?;
        names.push(name);
    }
    Ok(names)
}

/// All documents of `collection` under `root`, lazily.
pub(crate) fn documents(
    tree: &MerkleSearchTree,
    root: Option<BlockId>,
    collection: &str,
    start: Option<&RecordId>,
) -> Documents {
    let prefix = keys::doc_prefix(collection);
    let prefix_len = prefix.len();
    let iter = match start {
        Some(id) => tree.iter_prefix_from(root, &prefix, &keys::doc(collection, id.as_bytes())),
        None => tree.iter_prefix(root, &prefix),
    };
    Box::new(iter.map(move |entry| {
        let (key, value) = entry?;
        Ok(DocumentRecord {
            id: RecordId::from_bytes(key[prefix_len..].to_vec()),
            data: serde_json::from_slice(&value)?,
        })
    }))
}

pub(crate) fn fetch(
    tree: &MerkleSearchTree,
    root: Option<BlockId>,
    collection: &str,
    id: RecordId,
) -> DbResult<Option<DocumentRecord>> {
    match tree.get(root, &keys::doc(collection, id.as_bytes()))? {
        Some(bytes) => Ok(Some(DocumentRecord {
            id,
            data: serde_json::from_slice(&bytes)?,
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::database::Database;

    fn users() -> (Database, Collection) {
        let db = Database::in_memory().unwrap();
        let col = db.collection("users", "name").unwrap();
        (db, col)
    }

    fn names(docs: Documents) -> Vec<String> {
        docs.map(|d| d.unwrap().data["name"].as_str().unwrap().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[test]
    fn index_and_get() {
        let (_db, col) = users();
        let count = col
            .index_stream([
                Ok(json!({"name": "Alice", "age": 30})),
                Ok(json!({"name": "Bob"})),
            ])
            .unwrap();
        assert_eq!(count, 2);
        let alice = col.get(&RecordId::from("Alice")).unwrap();
        assert_eq!(alice.data["age"], 30);
        assert_eq!(alice.id, RecordId::from("Alice"));
        assert!(matches!(
            col.get(&RecordId::from("Nobody")),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn later_documents_replace_earlier_ones() {
        let (_db, col) = users();
        col.index_stream([Ok(json!({"name": "Alice", "v": 1}))]).unwrap();
        col.index_stream([Ok(json!({"name": "Alice", "v": 2}))]).unwrap();
        assert_eq!(col.count().unwrap(), 1);
        assert_eq!(col.get(&RecordId::from("Alice")).unwrap().data["v"], 2);
    }

    #[test]
    fn failed_ingest_is_all_or_nothing() {
        let (db, col) = users();
        col.index_stream([Ok(json!({"name": "Alice"}))]).unwrap();
        let before = db.root();

        let err = col
            .index_stream([Ok(json!({"name": "Bob"})), Ok(json!(["not", "an", "object"]))])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidDocument { line: 2, .. }));
        assert_eq!(db.root(), before);
        assert_eq!(col.count().unwrap(), 1);

        let err = col
            .index_stream([Ok(json!({"name": "Bob"})), Err(DbError::Decode("bad".into()))])
            .unwrap_err();
        assert!(matches!(err, DbError::Decode(_)));
        assert_eq!(db.root(), before);
    }

    #[test]
    fn ndjson_ingest() {
        let (_db, col) = users();
        let input = "  {\"name\": \"Alice\"}\n\n  {\"name\": \"Bob\"}\n";
        assert_eq!(col.index_ndjson(input.as_bytes()).unwrap(), 2);
        assert_eq!(names(col.iterate()), vec!["Alice", "Bob"]);
    }

    #[test]
    fn remove_documents() {
        let (_db, col) = users();
        col.index_stream([Ok(json!({"name": "Alice"}))]).unwrap();
        assert!(col.remove(&RecordId::from("Alice")).unwrap());
        assert!(!col.remove(&RecordId::from("Alice")).unwrap());
        assert_eq!(col.count().unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn iteration_is_ascending_and_scoped() {
        let (db, col) = users();
        let other = db.collection("users2", "name").unwrap();
        other.index_stream([Ok(json!({"name": "Zed"}))]).unwrap();
        col.index_stream(
            ["Carol", "Alice", "Bob"].iter().map(|n| Ok(json!({"name": n}))),
        )
        .unwrap();
        assert_eq!(names(col.iterate()), vec!["Alice", "Bob", "Carol"]);
        assert_eq!(names(other.iterate()), vec!["Zed"]);
    }

    #[test]
    fn iteration_resumes_from_a_record_id() {
        let (db, col) = users();
        let other = db.collection("users2", "name").unwrap();
        other.index_stream([Ok(json!({"name": "Zed"}))]).unwrap();
        col.index_stream(
            ["Alice", "Bob", "Carol", "Dave"].iter().map(|n| Ok(json!({"name": n}))),
        )
        .unwrap();

        let first: Vec<DocumentRecord> = col.iterate().take(2).map(|d| d.unwrap()).collect();
        let last = &first[1].id;
        let rest: Vec<String> = names(col.iterate_from(last)).into_iter().skip(1).collect();
        assert_eq!(rest, vec!["Carol", "Dave"]);

        // An absent id starts at the next present one; the scope stays this collection.
        assert_eq!(names(col.iterate_from(&RecordId::from("Bz"))), vec!["Carol", "Dave"]);
        assert!(names(col.iterate_from(&RecordId::from("Zz"))).is_empty());
    }

    #[test]
    fn proofs_verify_against_collection_root() {
        let (_db, col) = users();
        col.index_stream((0..100).map(|i| Ok(json!({"name": format!("user-{i:03}")}))))
            .unwrap();
        let root = col.root().unwrap();
        for i in [0, 42, 99] {
            let id = RecordId::from(format!("user-{i:03}").as_str());
            let proof = col.get_proof(&id).unwrap();
            assert!(proof.verify(&root));
            let doc: Value = serde_json::from_slice(&proof.value).unwrap();
            assert_eq!(doc, col.get(&id).unwrap().data);
        }
        assert!(matches!(
            col.get_proof(&RecordId::from("missing")),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn composite_primary_keys() {
        let db = Database::in_memory().unwrap();
        let col = db.collection_with_keys("events", &["source", "seq"]).unwrap();
        col.index_stream([
            Ok(json!({"source": "a", "seq": 1})),
            Ok(json!({"source": "a", "seq": 2})),
            Ok(json!({"source": "b", "seq": 1})),
        ])
        .unwrap();
        assert_eq!(col.count().unwrap(), 3);
        let id = RecordId::composite(vec![json!("a"), json!(2)]).unwrap();
        assert_eq!(col.get(&id).unwrap().data["seq"], 2);
        assert!(matches!(
            col.index_stream([Ok(json!({"source": "c"}))]),
            Err(DbError::MissingPrimaryKey { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    #[test]
    fn create_index_is_idempotent() {
        let (db, col) = users();
        col.index_stream([Ok(json!({"name": "Alice", "city": "Oslo"}))])
            .unwrap();
        col.create_index(&["city"]).unwrap();
        let root = db.root();
        let again = col.create_index(&["city", "city"]).unwrap();
        assert_eq!(db.root(), root);
        assert_eq!(again.fields(), ["city"]);
        assert_eq!(col.indexes().unwrap().len(), 1);
    }

    #[test]
    fn indexes_are_listed_sorted() {
        let (_db, col) = users();
        col.create_index(&["b"]).unwrap();
        col.create_index(&["a", "c"]).unwrap();
        let listed: Vec<Vec<String>> = col
            .indexes()
            .unwrap()
            .iter()
            .map(|i| i.fields().to_vec())
            .collect();
        assert_eq!(listed, vec![vec!["a".to_string(), "c".to_string()], vec!["b".to_string()]]);
    }
}

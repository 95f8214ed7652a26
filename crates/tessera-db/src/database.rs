//! The database handle.
//!
//! A database is one block store plus a root for its tree. All collections,
//! documents and index pointers live in that tree; index trees live in the
//! same store and are reached through their pointers. Every mutation runs in
//! a [`Session`] and is serialized by a writer lock. Readers copy the visible
//! roots under a short read lock and then walk immutable nodes lock-free.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use tessera_archive::{ArchiveError, ArchiveReader, ArchiveSummary, ArchiveWriter};
use tessera_store::{InMemoryBlockStore, StoreError};
use tessera_tree::{MerkleSearchTree, Precedence, TreeError};
use tessera_types::BlockId;
use tracing::{debug, info, warn};

use crate::collection::{list_collections, read_collection_meta, Collection};
use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use crate::index::list_indexes;
use crate::keys;
use crate::merge::merge_databases;
use crate::schema::{CollectionMetaInfo, DbMetaInfo, MetaRecord};
use crate::session::Session;

pub(crate) struct DbInner {
    pub(crate) store: Arc<InMemoryBlockStore>,
    pub(crate) tree: MerkleSearchTree,
    pub(crate) config: DatabaseConfig,
    state: RwLock<DbState>,
    writer: Mutex<()>,
}

struct DbState {
    /// Last flushed root.
    root: Option<BlockId>,
    /// Explicit session, if one is open.
    session: Option<Session>,
}

impl DbInner {
    /// The roots visible to readers right now.
    pub(crate) fn snapshot(&self) -> Session {
        let state = self.state.read().expect("lock poisoned");
        state
            .session
            .clone()
            .unwrap_or_else(|| Session::begin(state.root))
    }

    /// Run `f` as one all-or-nothing mutation.
    ///
    /// Inside an explicit session the work is kept in the session. Otherwise
    /// an implicit session is committed when `f` succeeds. A failed call
    /// publishes nothing either way.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut Session) -> DbResult<T>) -> DbResult<T> {
        let _writer = self.writer.lock().expect("lock poisoned");
        let (mut work, explicit) = {
            let state = self.state.read().expect("lock poisoned");
            match &state.session {
                Some(session) => (session.clone(), true),
                None => (Session::begin(state.root), false),
            }
        };

        let value = match f(&mut work) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, explicit, "mutation failed; changes discarded");
                return Err(e);
            }
        };

        if explicit {
            self.state.write().expect("lock poisoned").session = Some(work);
        } else {
            let root = work.commit(&self.tree)?;
            self.state.write().expect("lock poisoned").root = root;
        }
        Ok(value)
    }
}

/// An embedded document database.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// An empty database with the default configuration.
    pub fn in_memory() -> DbResult<Self> {
        Self::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> DbResult<Self> {
        let store = Arc::new(InMemoryBlockStore::new());
        let tree = MerkleSearchTree::new(store.clone());
        let meta = DbMetaInfo::current(&config.format).encode()?;
        let root = tree.put(None, &keys::db_meta(), &meta)?;
        Ok(Self::from_parts(store, config, Some(root)))
    }

    pub(crate) fn from_parts(
        store: Arc<InMemoryBlockStore>,
        config: DatabaseConfig,
        root: Option<BlockId>,
    ) -> Self {
        let tree = MerkleSearchTree::new(store.clone());
        Self {
            inner: Arc::new(DbInner {
                store,
                tree,
                config,
                state: RwLock::new(DbState {
                    root,
                    session: None,
                }),
                writer: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DbInner> {
        &self.inner
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn meta_info(&self) -> DbResult<DbMetaInfo> {
        let snapshot = self.inner.snapshot();
        let bytes = self
            .inner
            .tree
            .get(snapshot.root, &keys::db_meta())?
            .ok_or_else(|| DbError::NotFound("database metadata".into()))?;
        DbMetaInfo::decode(&bytes)
    }

    /// Number of blocks in the backing store.
    pub fn block_count(&self) -> usize {
        self.inner.store.len()
    }

    /// The last flushed root.
    pub fn root(&self) -> Option<BlockId> {
        self.inner.state.read().expect("lock poisoned").root
    }

    /// The root reads currently see, including unflushed session writes.
    ///
    /// Inside a session this root is transient: index roots are written into
    /// the tree only by [`Database::flush`], so the flushed root differs
    /// whenever an index changed. Proofs taken during a session verify
    /// against this root and not against the one `flush` publishes.
    pub fn working_root(&self) -> Option<BlockId> {
        self.inner.snapshot().root
    }

    // -----------------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------------

    /// Open or create a collection keyed by a single field.
    pub fn collection(&self, name: &str, key_field: &str) -> DbResult<Collection> {
        self.collection_with_keys(name, &[key_field])
    }

    /// Open or create a collection with a (possibly composite) primary key.
    ///
    /// Fails with [`DbError::SchemaMismatch`] if the collection exists with
    /// a different key.
    pub fn collection_with_keys<S: AsRef<str>>(
        &self,
        name: &str,
        key_fields: &[S],
    ) -> DbResult<Collection> {
        let primary_key: Vec<String> = key_fields.iter().map(|f| f.as_ref().to_string()).collect();
        if primary_key.is_empty() {
            return Err(DbError::SchemaMismatch {
                collection: name.to_string(),
                reason: "a primary key needs at least one field".into(),
            });
        }

        let tree = &self.inner.tree;
        self.inner.mutate(|session| {
            match read_collection_meta(tree, session.root, name)? {
                Some(meta) if meta.primary_key != primary_key => {
                    return Err(DbError::SchemaMismatch {
                        collection: name.to_string(),
                        reason: format!(
                            "primary key is {:?}, requested {:?}",
                            meta.primary_key, primary_key
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    let meta = CollectionMetaInfo::current(primary_key.clone()).encode()?;
                    session.root = Some(tree.put(session.root, &keys::catalog(name), &meta)?);
                    debug!(collection = name, key = ?primary_key, "created collection");
                }
            }
            Ok(())
        })?;
        Ok(Collection::new(
            Arc::clone(&self.inner),
            name.to_string(),
            primary_key,
        ))
    }

    /// Open a collection by its stored definition.
    pub fn existing_collection(&self, name: &str) -> DbResult<Collection> {
        let snapshot = self.inner.snapshot();
        let meta = read_collection_meta(&self.inner.tree, snapshot.root, name)?
            .ok_or_else(|| DbError::NotFound(format!("collection {name}")))?;
        Ok(Collection::new(
            Arc::clone(&self.inner),
            name.to_string(),
            meta.primary_key,
        ))
    }

    pub fn collection_names(&self) -> DbResult<Vec<String>> {
        list_collections(&self.inner.tree, self.inner.snapshot().root)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Open an explicit mutation session.
    ///
    /// Writes stay visible to reads through this database but are published
    /// as [`Database::root`] only by [`Database::flush`].
    pub fn start_mutating(&self) -> DbResult<()> {
        let _writer = self.inner.writer.lock().expect("lock poisoned");
        let mut state = self.inner.state.write().expect("lock poisoned");
        if state.session.is_some() {
            return Err(DbError::SessionActive);
        }
        state.session = Some(Session::begin(state.root));
        debug!("session started");
        Ok(())
    }

    /// Commit the open session and publish its root.
    pub fn flush(&self) -> DbResult<Option<BlockId>> {
        let _writer = self.inner.writer.lock().expect("lock poisoned");
        let session = self
            .inner
            .state
            .read()
            .expect("lock poisoned")
            .session
            .clone()
            .ok_or(DbError::NoActiveSession)?;
        let buffered = session.index_roots.len();
        let root = session.commit(&self.inner.tree)?;

        let mut state = self.inner.state.write().expect("lock poisoned");
        state.session = None;
        state.root = root;
        debug!(?root, index_roots = buffered, "session flushed");
        Ok(root)
    }

    /// Drop the open session and everything written in it.
    pub fn discard(&self) -> DbResult<()> {
        let _writer = self.inner.writer.lock().expect("lock poisoned");
        let mut state = self.inner.state.write().expect("lock poisoned");
        state.session.take().ok_or(DbError::NoActiveSession)?;
        debug!("session discarded");
        Ok(())
    }

    pub fn in_session(&self) -> bool {
        self.inner
            .state
            .read()
            .expect("lock poisoned")
            .session
            .is_some()
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    /// Root of every index tree reachable from `root`.
    fn index_roots(&self, root: Option<BlockId>) -> DbResult<Vec<Option<BlockId>>> {
        let tree = &self.inner.tree;
        let snapshot = Session::begin(root);
        let mut roots = Vec::new();
        for name in list_collections(tree, root)? {
            for fields in list_indexes(tree, root, &name)? {
                roots.push(snapshot.index_root(tree, &keys::index_root(&name, &fields))?);
            }
        }
        Ok(roots)
    }

    /// Write the durable state into a single archive file.
    pub fn export_to_archive(&self, path: &Path) -> DbResult<ArchiveSummary> {
        if self.in_session() {
            return Err(DbError::SessionActive);
        }
        let root = self.root();
        let tree = &self.inner.tree;

        let mut ids = tree.walk(root)?;
        for index_root in self.index_roots(root)? {
            ids.extend(tree.walk(index_root)?);
        }

        let mut writer = ArchiveWriter::new(self.inner.config.compression_level);
        writer.set_root(root);
        writer.set_metadata(self.meta_info()?.encode()?);
        writer.add_from_store(self.inner.store.as_ref(), &ids)?;
        let summary = writer.write_to(path)?;
        info!(
            path = %path.display(),
            blocks = summary.block_count,
            bytes = summary.bytes,
            "exported database"
        );
        Ok(summary)
    }

    /// Load a database from an archive written by [`Database::export_to_archive`].
    pub fn import_from_archive(path: &Path) -> DbResult<Self> {
        Self::import_with_config(path, DatabaseConfig::default())
    }

    pub fn import_with_config(path: &Path, config: DatabaseConfig) -> DbResult<Self> {
        let reader = ArchiveReader::open(path).map_err(archive_error)?;
        let meta = DbMetaInfo::decode(reader.metadata())
            .map_err(|e| DbError::CorruptArchive(format!("metadata: {e}")))?;
        meta.check_compatible(&config.format)?;
        let root = reader
            .root()
            .ok_or_else(|| DbError::CorruptArchive("archive has no root".into()))?;

        let source = MerkleSearchTree::new(Arc::new(reader));
        let store = Arc::new(InMemoryBlockStore::new());
        let mut copied = source
            .copy_reachable(Some(root), store.as_ref())
            .map_err(missing_block)?;

        let db = Self::from_parts(store, config, Some(root));
        for index_root in db.index_roots(Some(root))? {
            copied += source
                .copy_reachable(index_root, db.inner.store.as_ref())
                .map_err(missing_block)?;
        }
        // The stored metadata must agree with what the manifest carried.
        db.meta_info()?.check_compatible(&db.inner.config.format)?;
        info!(path = %path.display(), %root, blocks = copied, "imported database");
        Ok(db)
    }

    /// Read and check every block of the archive at `path`, reachable or
    /// not. Returns the number of blocks checked.
    pub fn verify_archive(path: &Path) -> DbResult<usize> {
        let reader = ArchiveReader::open(path).map_err(archive_error)?;
        let checked = reader.verify_all().map_err(archive_error)?;
        debug!(path = %path.display(), blocks = checked, "verified archive");
        Ok(checked)
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Merge two databases; `right` wins conflicting documents.
    pub fn merge(left: &Database, right: &Database) -> DbResult<Database> {
        Self::merge_with(left, right, Precedence::Right)
    }

    pub fn merge_with(
        left: &Database,
        right: &Database,
        precedence: Precedence,
    ) -> DbResult<Database> {
        merge_databases(left, right, precedence)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.root())
            .field("in_session", &self.in_session())
            .field("blocks", &self.block_count())
            .finish()
    }
}

fn archive_error(e: ArchiveError) -> DbError {
    match e {
        ArchiveError::Io(e) => DbError::Io(e),
        other => DbError::CorruptArchive(other.to_string()),
    }
}

fn missing_block(e: TreeError) -> DbError {
    match e {
        TreeError::Store(StoreError::NotFound(id)) => {
            DbError::CorruptArchive(format!("missing block {id}"))
        }
        TreeError::Store(e @ (StoreError::CorruptBlock { .. } | StoreError::HashMismatch { .. })) => {
            DbError::CorruptArchive(e.to_string())
        }
        TreeError::CorruptNode { id, reason } => {
            DbError::CorruptArchive(format!("node {id}: {reason}"))
        }
        other => DbError::Tree(other),
    }
}

//! Embedded content-addressed document database.
//!
//! Documents live in named collections keyed by a primary field (or tuple of
//! fields) inside one Merkle Search Tree. Secondary indexes are trees of
//! their own in the same block store. Because every tree is canonical and
//! content-addressed, any stored document can be proven part of a database
//! root, and two databases merge while sharing every unchanged sub-tree.
//!
//! - [`Database`] -- sessions, collections, export/import, merge
//! - [`Collection`] -- ingest, get, remove, iterate, search, proofs
//! - [`Index`] -- secondary index on a sorted field list
//! - [`Query`] / [`QueryPlan`] -- equality queries and how they are answered
//! - [`NdjsonSource`] -- newline-delimited JSON document source
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tessera_db::{Database, Query, RecordId};
//!
//! let db = Database::in_memory().unwrap();
//! let users = db.collection("users", "name").unwrap();
//! users
//!     .index_stream([Ok(json!({"name": "Alice"})), Ok(json!({"name": "Bob"}))])
//!     .unwrap();
//!
//! let bob: Vec<_> = users.search(&Query::new().equal("name", "Bob")).unwrap().collect();
//! assert_eq!(bob.len(), 1);
//!
//! let proof = users.get_proof(&RecordId::from("Bob")).unwrap();
//! assert!(proof.verify(&users.root().unwrap()));
//! ```

pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod keys;
pub mod merge;
pub mod ndjson;
pub mod query;
pub mod record;
pub mod schema;
pub mod session;

pub use collection::{Collection, Documents};
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{DbError, DbResult};
pub use index::Index;
pub use ndjson::NdjsonSource;
pub use query::{plan, Query, QueryPlan};
pub use record::{DocumentRecord, RecordId};
pub use schema::{
    CollectionMetaInfo, DbMetaInfo, IndexMetaInfo, MetaRecord, CURRENT_COLLECTION_VERSION,
    CURRENT_DB_VERSION, CURRENT_INDEX_VERSION, DB_FORMAT,
};
pub use session::Session;

pub use tessera_archive::ArchiveSummary;
pub use tessera_tree::{Precedence, Proof, ProofStep, Verification};
pub use tessera_types::BlockId;

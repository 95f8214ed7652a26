use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("schema mismatch for collection {collection}: {reason}")]
    SchemaMismatch { collection: String, reason: String },

    #[error("document is missing primary key field {field:?}")]
    MissingPrimaryKey { field: String },

    #[error("invalid document {line}: {reason}")]
    InvalidDocument { line: usize, reason: String },

    #[error("invalid index definition: {0}")]
    InvalidIndex(String),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("incompatible database: {0}")]
    IncompatibleDatabase(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("a mutation session is already active")]
    SessionActive,

    #[error("no mutation session is active")]
    NoActiveSession,

    #[error("store error: {0}")]
    Store(#[from] tessera_store::StoreError),

    #[error("tree error: {0}")]
    Tree(#[from] tessera_tree::TreeError),

    #[error("archive error: {0}")]
    Archive(#[from] tessera_archive::ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

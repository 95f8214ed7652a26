use thiserror::Error;
use tessera_types::BlockId;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid archive magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),

    #[error("archive checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt archive entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for block {id}")]
    CrcMismatch { id: BlockId },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

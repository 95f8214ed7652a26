//! Per-block entry encoding.

use crate::error::{ArchiveError, ArchiveResult};

/// Magic bytes opening and closing every archive.
pub const MAGIC: &[u8; 4] = b"TSRA";
/// Current archive format version.
pub const VERSION: u32 = 1;
/// Blocks smaller than this are stored uncompressed.
pub const RAW_THRESHOLD: usize = 64;
/// Largest block a reader will decode.
pub const MAX_BLOCK_LEN: usize = 64 * 1024 * 1024;

/// How a block's bytes are stored in the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockEncoding {
    Raw,
    Zstd,
}

impl BlockEncoding {
    /// Pick the encoding for a block of `len` bytes.
    pub fn for_len(len: usize) -> Self {
        if len < RAW_THRESHOLD {
            Self::Raw
        } else {
            Self::Zstd
        }
    }

    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Zstd => 1,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Raw),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Encode `data` for storage.
    pub fn encode(&self, data: &[u8], level: i32) -> ArchiveResult<Vec<u8>> {
        match self {
            Self::Raw => Ok(data.to_vec()),
            Self::Zstd => {
                zstd::encode_all(data, level).map_err(|e| ArchiveError::Compression(e.to_string()))
            }
        }
    }

    /// Decode stored bytes back into a block of `raw_len` bytes.
    ///
    /// Decompression never produces more than `raw_len` bytes, and `raw_len`
    /// itself may not exceed [`MAX_BLOCK_LEN`].
    pub fn decode(&self, stored: &[u8], raw_len: usize) -> ArchiveResult<Vec<u8>> {
        if raw_len > MAX_BLOCK_LEN {
            return Err(ArchiveError::Decompression(format!(
                "block of {raw_len} bytes exceeds the {MAX_BLOCK_LEN} byte limit"
            )));
        }
        match self {
            Self::Raw => Ok(stored.to_vec()),
            Self::Zstd => zstd::bulk::decompress(stored, raw_len)
                .map_err(|e| ArchiveError::Decompression(e.to_string())),
        }
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8], offset: u64) -> ArchiveResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(ArchiveError::CorruptEntry {
                offset,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(ArchiveError::CorruptEntry {
        offset,
        reason: "truncated varint".into(),
    })
}

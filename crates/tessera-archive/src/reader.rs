use std::path::Path;

use tessera_store::{Block, BlockStore, StoreError, StoreResult};
use tessera_types::BlockId;

use crate::entry::{decode_varint, BlockEncoding, MAGIC, VERSION};
use crate::error::{ArchiveError, ArchiveResult};
use crate::index::ArchiveIndex;
use crate::manifest::ArchiveManifest;
use crate::writer::{FOOTER_LEN, HEADER_LEN};

/// Random-access reader over one archive.
///
/// The whole file is validated on open: magic, version, footer offsets, the
/// BLAKE3 checksum, the index and the manifest. Individual blocks are
/// CRC-checked and re-hashed as they are read.
///
/// The archive is held in memory, so a reader is unaffected by later writes
/// to the file it was opened from.
///
/// An `ArchiveReader` is a read-only [`BlockStore`].
pub struct ArchiveReader {
    data: Vec<u8>,
    manifest: ArchiveManifest,
    index: ArchiveIndex,
    /// End of the block region, where the manifest starts.
    blocks_end: usize,
}

impl ArchiveReader {
    /// Read and validate the archive at `path`.
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Validate an archive held in memory.
    pub fn from_bytes(data: Vec<u8>) -> ArchiveResult<Self> {
        let bytes = data.as_slice();
        let len = bytes.len();
        if len < HEADER_LEN + FOOTER_LEN {
            return Err(ArchiveError::CorruptEntry {
                offset: 0,
                reason: "archive too short".into(),
            });
        }

        check_magic(&bytes[0..4])?;
        let version = u32::from_be_bytes(fixed(bytes, 4)?);
        if version != VERSION {
            return Err(ArchiveError::UnsupportedVersion(version));
        }
        let block_count = u64::from_be_bytes(fixed(bytes, 8)?);

        let footer = len - FOOTER_LEN;
        check_magic(&bytes[len - 4..])?;
        let checksum_at = len - 4 - 32;
        if blake3::hash(&bytes[..checksum_at]).as_bytes() != &bytes[checksum_at..len - 4] {
            return Err(ArchiveError::ChecksumMismatch);
        }

        let manifest_offset = to_usize(u64::from_be_bytes(fixed(bytes, footer)?), footer as u64)?;
        let manifest_len = to_usize(u64::from_be_bytes(fixed(bytes, footer + 8)?), footer as u64)?;
        let index_offset = to_usize(u64::from_be_bytes(fixed(bytes, footer + 16)?), footer as u64)?;
        let manifest_end = manifest_offset.checked_add(manifest_len);
        if manifest_offset < HEADER_LEN || manifest_end != Some(index_offset) || index_offset > footer
        {
            return Err(ArchiveError::CorruptEntry {
                offset: footer as u64,
                reason: "footer offsets are inconsistent".into(),
            });
        }

        let count = to_usize(block_count, 8)?;
        let index = ArchiveIndex::from_bytes(&bytes[index_offset..footer], count)?;
        let manifest = ArchiveManifest::from_bytes(&bytes[manifest_offset..index_offset])?;
        if manifest.block_count != block_count {
            return Err(ArchiveError::CorruptEntry {
                offset: manifest_offset as u64,
                reason: format!(
                    "manifest lists {} blocks, header lists {block_count}",
                    manifest.block_count
                ),
            });
        }

        Ok(Self {
            data,
            manifest,
            index,
            blocks_end: manifest_offset,
        })
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// Root recorded by the writer.
    pub fn root(&self) -> Option<BlockId> {
        self.manifest.root
    }

    /// Opaque metadata recorded by the writer.
    pub fn metadata(&self) -> &[u8] {
        &self.manifest.metadata
    }

    pub fn block_count(&self) -> usize {
        self.index.block_count()
    }

    pub fn block_ids(&self) -> &[BlockId] {
        &self.index.block_ids
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.index.contains(id)
    }

    /// Read and verify one block.
    pub fn read_block(&self, id: &BlockId) -> ArchiveResult<Option<Vec<u8>>> {
        let Some((offset, expected_crc)) = self.index.lookup(id) else {
            return Ok(None);
        };
        self.read_at(id, offset, expected_crc).map(Some)
    }

    /// Read and verify every block, returning how many were checked.
    pub fn verify_all(&self) -> ArchiveResult<usize> {
        for id in self.block_ids() {
            self.read_block(id)?;
        }
        Ok(self.block_count())
    }

    fn read_at(&self, id: &BlockId, offset: u64, expected_crc: u32) -> ArchiveResult<Vec<u8>> {
        let data = &self.data[..self.blocks_end];
        let corrupt = |reason: &str| ArchiveError::CorruptEntry {
            offset,
            reason: reason.into(),
        };

        let mut pos = to_usize(offset, offset)?;
        if pos < HEADER_LEN || pos >= data.len() {
            return Err(corrupt("offset outside the block region"));
        }

        let encoding = BlockEncoding::from_type_byte(data[pos])
            .ok_or_else(|| corrupt("unknown encoding byte"))?;
        pos += 1;

        let (raw_len, consumed) = decode_varint(&data[pos..], offset)?;
        pos += consumed;
        let (stored_len, consumed) = decode_varint(&data[pos..], offset)?;
        pos += consumed;

        let end = to_usize(stored_len, offset)
            .ok()
            .and_then(|n| pos.checked_add(n))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| corrupt("stored bytes extend beyond the block region"))?;
        let stored = &data[pos..end];

        if crc32fast::hash(stored) != expected_crc {
            return Err(ArchiveError::CrcMismatch { id: *id });
        }

        let raw_len = to_usize(raw_len, offset)?;
        let decoded = encoding.decode(stored, raw_len)?;
        if decoded.len() != raw_len {
            return Err(corrupt("decoded length does not match the recorded length"));
        }
        if Block::id_for(&decoded) != *id {
            return Err(corrupt("block bytes do not hash to the indexed id"));
        }
        Ok(decoded)
    }
}

impl BlockStore for ArchiveReader {
    fn read(&self, id: &BlockId) -> StoreResult<Option<Block>> {
        self.read_block(id)
            .map(|data| data.map(Block::new))
            .map_err(|e| StoreError::CorruptBlock {
                id: *id,
                reason: e.to_string(),
            })
    }

    fn write(&self, _data: &[u8]) -> StoreResult<BlockId> {
        Err(StoreError::ReadOnly)
    }

    fn exists(&self, id: &BlockId) -> StoreResult<bool> {
        Ok(self.contains(id))
    }
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("root", &self.manifest.root)
            .field("block_count", &self.block_count())
            .finish()
    }
}

fn check_magic(bytes: &[u8]) -> ArchiveResult<()> {
    if bytes != MAGIC {
        return Err(ArchiveError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(bytes).into(),
        });
    }
    Ok(())
}

fn fixed<const N: usize>(bytes: &[u8], at: usize) -> ArchiveResult<[u8; N]> {
    bytes
        .get(at..at + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| ArchiveError::CorruptEntry {
            offset: at as u64,
            reason: "truncated integer".into(),
        })
}

fn to_usize(value: u64, offset: u64) -> ArchiveResult<usize> {
    usize::try_from(value).map_err(|_| ArchiveError::CorruptEntry {
        offset,
        reason: format!("value {value} does not fit in memory"),
    })
}

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tessera_store::{Block, BlockStore};
use tessera_types::BlockId;
use tracing::debug;

use crate::entry::{encode_varint, BlockEncoding, MAGIC, VERSION};
use crate::error::{ArchiveError, ArchiveResult};
use crate::index::ArchiveIndex;
use crate::manifest::ArchiveManifest;

/// Size of the fixed header: magic, version, block count.
pub(crate) const HEADER_LEN: usize = 4 + 4 + 8;
/// Size of the fixed footer: manifest offset and length, index offset,
/// checksum, magic.
pub(crate) const FOOTER_LEN: usize = 8 + 8 + 8 + 32 + 4;

/// Result of writing an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub root: Option<BlockId>,
    pub block_count: u64,
    /// Total archive size in bytes.
    pub bytes: u64,
    /// BLAKE3 checksum recorded in the footer.
    pub checksum: [u8; 32],
}

/// Builds a single-file archive from a set of blocks.
///
/// Blocks are deduplicated by id and written in id order, so the same block
/// set, root and metadata always produce byte-identical archives.
pub struct ArchiveWriter {
    compression_level: i32,
    root: Option<BlockId>,
    metadata: Vec<u8>,
    blocks: BTreeMap<BlockId, Vec<u8>>,
}

impl ArchiveWriter {
    /// Create a writer compressing blocks at the given zstd level.
    pub fn new(compression_level: i32) -> Self {
        Self {
            compression_level,
            root: None,
            metadata: Vec::new(),
            blocks: BTreeMap::new(),
        }
    }

    /// Set the root recorded in the manifest.
    pub fn set_root(&mut self, root: Option<BlockId>) {
        self.root = root;
    }

    /// Set the opaque metadata recorded in the manifest.
    pub fn set_metadata(&mut self, metadata: Vec<u8>) {
        self.metadata = metadata;
    }

    /// Add a block, returning its id.
    pub fn add_block(&mut self, data: &[u8]) -> BlockId {
        let id = Block::id_for(data);
        self.blocks.entry(id).or_insert_with(|| data.to_vec());
        id
    }

    /// Add every listed block from `store`.
    pub fn add_from_store(&mut self, store: &dyn BlockStore, ids: &[BlockId]) -> ArchiveResult<()> {
        for id in ids {
            if self.blocks.contains_key(id) {
                continue;
            }
            let block = store.get(id).map_err(|e| ArchiveError::CorruptEntry {
                offset: 0,
                reason: format!("cannot read block {id}: {e}"),
            })?;
            self.blocks.insert(*id, block.data);
        }
        Ok(())
    }

    /// Number of distinct blocks queued.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Write the archive to `path`, replacing any existing file.
    ///
    /// The archive is written to a temporary file next to `path` and renamed
    /// over it, so readers see either the old archive or the new one.
    pub fn write_to(self, path: &Path) -> ArchiveResult<ArchiveSummary> {
        let (bytes, summary) = self.finish_to_bytes()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        debug!(path = %path.display(), blocks = summary.block_count, bytes = summary.bytes, "archive written");
        Ok(summary)
    }

    /// Build the archive in memory (no disk I/O).
    pub fn finish_to_bytes(self) -> ArchiveResult<(Vec<u8>, ArchiveSummary)> {
        let block_count = self.blocks.len() as u64;
        let mut out = Vec::new();

        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&block_count.to_be_bytes());

        let mut index_entries = Vec::with_capacity(self.blocks.len());
        for (id, data) in &self.blocks {
            let offset = out.len() as u64;
            let encoding = BlockEncoding::for_len(data.len());
            let stored = encoding.encode(data, self.compression_level)?;

            out.push(encoding.type_byte());
            encode_varint(&mut out, data.len() as u64);
            encode_varint(&mut out, stored.len() as u64);
            let crc = crc32fast::hash(&stored);
            out.extend_from_slice(&stored);

            index_entries.push((*id, crc, offset));
        }

        let manifest = ArchiveManifest {
            root: self.root,
            metadata: self.metadata,
            block_count,
        };
        let manifest_offset = out.len() as u64;
        let manifest_bytes = manifest.to_bytes()?;
        out.extend_from_slice(&manifest_bytes);

        let index_offset = out.len() as u64;
        out.extend_from_slice(&ArchiveIndex::build(index_entries).to_bytes());

        out.extend_from_slice(&manifest_offset.to_be_bytes());
        out.extend_from_slice(&(manifest_bytes.len() as u64).to_be_bytes());
        out.extend_from_slice(&index_offset.to_be_bytes());
        let checksum = *blake3::hash(&out).as_bytes();
        out.extend_from_slice(&checksum);
        out.extend_from_slice(MAGIC);

        let summary = ArchiveSummary {
            root: manifest.root,
            block_count,
            bytes: out.len() as u64,
            checksum,
        };
        Ok((out, summary))
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::InMemoryBlockStore;

    #[test]
    fn empty_archive_layout() {
        let (bytes, summary) = ArchiveWriter::default().finish_to_bytes().unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(&bytes[bytes.len() - 4..], MAGIC);
        assert_eq!(summary.block_count, 0);
        assert_eq!(summary.root, None);
        assert_eq!(summary.bytes as usize, bytes.len());
        assert!(bytes.len() >= HEADER_LEN + ArchiveIndex::encoded_len(0) + FOOTER_LEN);
    }

    #[test]
    fn duplicate_blocks_are_written_once() {
        let mut writer = ArchiveWriter::default();
        let a = writer.add_block(b"same");
        let b = writer.add_block(b"same");
        assert_eq!(a, b);
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn output_is_deterministic() {
        fn build(order: &[&[u8]]) -> Vec<u8> {
            let mut writer = ArchiveWriter::default();
            for data in order {
                writer.add_block(data);
            }
            writer.set_metadata(b"meta".to_vec());
            writer.finish_to_bytes().unwrap().0
        }
        let one: &[u8] = b"one";
        let two: &[u8] = b"two";
        assert_eq!(build(&[one, two]), build(&[two, one]));
    }

    #[test]
    fn add_from_store_requires_presence() {
        let store = InMemoryBlockStore::new();
        let present = store.write(b"present").unwrap();
        let mut writer = ArchiveWriter::default();
        writer.add_from_store(&store, &[present]).unwrap();
        assert_eq!(writer.len(), 1);

        let missing = Block::id_for(b"missing");
        assert!(writer.add_from_store(&store, &[missing]).is_err());
    }
}

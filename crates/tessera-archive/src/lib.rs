//! Single-file archive format for Tessera.
//!
//! An archive carries a set of content-addressed blocks plus a manifest (root
//! pointer and opaque metadata) in one file. It is how databases are exported,
//! imported and shipped between processes.
//!
//! # Layout
//!
//! All integers are big-endian.
//!
//! ```text
//! header   "TSRA" | version u32 | block count u64
//! blocks   encoding u8 | varint raw len | varint stored len | stored bytes
//! manifest bincode(ArchiveManifest)
//! index    fan-out[256] u32 | sorted BlockIds | CRC32s | offsets u64
//! footer   manifest offset u64 | manifest len u64 | index offset u64 | BLAKE3[32] | "TSRA"
//! ```
//!
//! Blocks under 64 bytes are stored raw, the rest zstd-compressed. The BLAKE3
//! checksum covers every byte before it.
//!
//! - [`ArchiveWriter`] -- builds archives from blocks or a block store
//! - [`ArchiveReader`] -- validates and reads archives; a read-only block store

pub mod entry;
pub mod error;
pub mod index;
pub mod manifest;
pub mod reader;
pub mod writer;

pub use entry::{BlockEncoding, MAGIC, MAX_BLOCK_LEN, VERSION};
pub use error::{ArchiveError, ArchiveResult};
pub use index::ArchiveIndex;
pub use manifest::ArchiveManifest;
pub use reader::ArchiveReader;
pub use writer::{ArchiveSummary, ArchiveWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::{Block, BlockStore, StoreError};
    use tessera_types::BlockId;

    fn sample_writer() -> (ArchiveWriter, Vec<(BlockId, Vec<u8>)>) {
        let mut writer = ArchiveWriter::new(3);
        let blocks: Vec<Vec<u8>> = vec![
            b"tiny".to_vec(),
            vec![0xAB; 10_000],
            (0..200u8).collect(),
        ];
        let ids = blocks
            .into_iter()
            .map(|data| (writer.add_block(&data), data))
            .collect();
        writer.set_metadata(b"{\"format\":\"database\"}".to_vec());
        (writer, ids)
    }

    // -----------------------------------------------------------------------
    // Roundtrips
    // -----------------------------------------------------------------------

    #[test]
    fn write_read_roundtrip() {
        let (mut writer, blocks) = sample_writer();
        writer.set_root(Some(blocks[0].0));
        let (bytes, summary) = writer.finish_to_bytes().unwrap();
        assert_eq!(summary.block_count, 3);

        let reader = ArchiveReader::from_bytes(bytes).unwrap();
        assert_eq!(reader.block_count(), 3);
        assert_eq!(reader.root(), Some(blocks[0].0));
        assert_eq!(reader.metadata(), b"{\"format\":\"database\"}");
        for (id, data) in &blocks {
            assert_eq!(reader.read_block(id).unwrap().as_deref(), Some(data.as_slice()));
        }
        assert_eq!(reader.verify_all().unwrap(), 3);
    }

    #[test]
    fn large_blocks_are_compressed() {
        let mut writer = ArchiveWriter::default();
        writer.add_block(&vec![0u8; 100_000]);
        let (bytes, _) = writer.finish_to_bytes().unwrap();
        assert!(bytes.len() < 100_000);
    }

    #[test]
    fn empty_archive() {
        let (bytes, _) = ArchiveWriter::default().finish_to_bytes().unwrap();
        let reader = ArchiveReader::from_bytes(bytes).unwrap();
        assert_eq!(reader.block_count(), 0);
        assert_eq!(reader.root(), None);
        assert!(reader.read_block(&BlockId::from_hash([1; 32])).unwrap().is_none());
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.tsra");

        let (writer, blocks) = sample_writer();
        let summary = writer.write_to(&path).unwrap();
        assert_eq!(summary.bytes, std::fs::metadata(&path).unwrap().len());

        let reader = ArchiveReader::open(&path).unwrap();
        for (id, data) in &blocks {
            assert_eq!(reader.read_block(id).unwrap().unwrap(), *data);
        }
    }

    #[test]
    fn rewriting_a_path_leaves_open_readers_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.tsra");

        let mut big = ArchiveWriter::default();
        let ids: Vec<BlockId> = (0..2000u32)
            .map(|i| big.add_block(format!("block-{i}-{}", "x".repeat(100)).as_bytes()))
            .collect();
        big.write_to(&path).unwrap();
        let reader = ArchiveReader::open(&path).unwrap();

        let mut small = ArchiveWriter::default();
        let replacement = small.add_block(b"only");
        small.write_to(&path).unwrap();

        let last = ids.iter().max().unwrap();
        assert!(reader.read_block(last).unwrap().is_some());
        assert_eq!(reader.verify_all().unwrap(), 2000);

        let reopened = ArchiveReader::open(&path).unwrap();
        assert_eq!(reopened.block_ids(), &[replacement]);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn oversized_recorded_length_is_rejected() {
        let mut writer = ArchiveWriter::default();
        let id = writer.add_block(&vec![5u8; 1000]);
        let (mut bytes, _) = writer.finish_to_bytes().unwrap();

        // The single block starts right after the header: encoding byte, then
        // the raw length varint. Swap in a huge length and re-seal the file.
        let header = 16;
        assert_eq!(bytes[header], BlockEncoding::Zstd.type_byte());
        let mut patched = bytes[..header + 1].to_vec();
        let mut huge = Vec::new();
        crate::entry::encode_varint(&mut huge, (MAX_BLOCK_LEN as u64) * 4);
        patched.extend_from_slice(&huge);
        let old_varint_len = 2; // 1000 needs two varint bytes
        patched.extend_from_slice(&bytes[header + 1 + old_varint_len..]);
        bytes = reseal(patched, huge.len() - old_varint_len);

        let reader = ArchiveReader::from_bytes(bytes).unwrap();
        assert!(matches!(
            reader.read_block(&id),
            Err(ArchiveError::Decompression(_))
        ));
    }

    /// Shift the footer offsets by `grown` bytes and recompute the checksum.
    fn reseal(mut bytes: Vec<u8>, grown: usize) -> Vec<u8> {
        let len = bytes.len();
        let footer = len - 60;
        for field in 0..3 {
            if field == 1 {
                continue;
            }
            let at = footer + field * 8;
            let value = u64::from_be_bytes(bytes[at..at + 8].try_into().unwrap());
            bytes[at..at + 8].copy_from_slice(&(value + grown as u64).to_be_bytes());
        }
        let checksum_at = len - 36;
        let checksum = *blake3::hash(&bytes[..checksum_at]).as_bytes();
        bytes[checksum_at..len - 4].copy_from_slice(&checksum);
        bytes
    }

    // -----------------------------------------------------------------------
    // Block store view
    // -----------------------------------------------------------------------

    #[test]
    fn reader_is_a_read_only_block_store() {
        let (writer, blocks) = sample_writer();
        let (bytes, _) = writer.finish_to_bytes().unwrap();
        let reader = ArchiveReader::from_bytes(bytes).unwrap();
        let store: &dyn BlockStore = &reader;

        let (id, data) = &blocks[1];
        assert!(store.exists(id).unwrap());
        assert_eq!(store.get(id).unwrap().data, *data);
        assert!(store.read(&Block::id_for(b"absent")).unwrap().is_none());
        assert!(matches!(store.write(b"new"), Err(StoreError::ReadOnly)));
    }

    // -----------------------------------------------------------------------
    // Corruption
    // -----------------------------------------------------------------------

    #[test]
    fn bad_magic() {
        let (writer, _) = sample_writer();
        let (mut bytes, _) = writer.finish_to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"BADM");
        assert!(matches!(
            ArchiveReader::from_bytes(bytes),
            Err(ArchiveError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn bad_version() {
        let (writer, _) = sample_writer();
        let (mut bytes, _) = writer.finish_to_bytes().unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_be_bytes());
        assert!(matches!(
            ArchiveReader::from_bytes(bytes),
            Err(ArchiveError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let (writer, _) = sample_writer();
        let (mut bytes, _) = writer.finish_to_bytes().unwrap();
        bytes[20] ^= 0x01;
        assert!(matches!(
            ArchiveReader::from_bytes(bytes),
            Err(ArchiveError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_archive() {
        let (writer, _) = sample_writer();
        let (bytes, _) = writer.finish_to_bytes().unwrap();
        assert!(ArchiveReader::from_bytes(bytes[..bytes.len() - 10].to_vec()).is_err());
        assert!(matches!(
            ArchiveReader::from_bytes(vec![1, 2, 3]),
            Err(ArchiveError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArchiveReader::open(&dir.path().join("absent.tsra")),
            Err(ArchiveError::Io(_))
        ));
    }
}

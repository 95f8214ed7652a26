use tessera_types::BlockId;

use crate::error::{ArchiveError, ArchiveResult};

/// Size in bytes of one index row: id, CRC32, offset.
const ROW_LEN: usize = 32 + 4 + 8;
/// Size in bytes of the fan-out table.
const FAN_OUT_LEN: usize = 256 * 4;

/// Block index stored near the end of an archive.
///
/// Layout:
/// - Fan-out table: 256 entries counting blocks with first byte <= index
/// - Sorted BlockId array
/// - CRC32 array (parallel, over stored bytes)
/// - Offset array (parallel, from the start of the file)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveIndex {
    pub fan_out: [u32; 256],
    pub block_ids: Vec<BlockId>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
}

impl ArchiveIndex {
    /// Build an index from (id, crc32, offset) entries.
    pub fn build(mut entries: Vec<(BlockId, u32, u64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fan_out = [0u32; 256];
        let mut block_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());

        for (id, crc, offset) in &entries {
            block_ids.push(*id);
            crc32s.push(*crc);
            offsets.push(*offset);
        }

        for id in &block_ids {
            fan_out[id.as_bytes()[0] as usize] += 1;
        }
        for i in 1..256 {
            fan_out[i] += fan_out[i - 1];
        }

        Self {
            fan_out,
            block_ids,
            crc32s,
            offsets,
        }
    }

    /// Look up a block's (offset, crc32) by id.
    pub fn lookup(&self, id: &BlockId) -> Option<(u64, u32)> {
        let first_byte = id.as_bytes()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let range = self.block_ids.get(start..end)?;
        let pos = range.binary_search(id).ok()?;
        let idx = start + pos;
        Some((self.offsets[idx], self.crc32s[idx]))
    }

    pub fn block_count(&self) -> usize {
        self.block_ids.len()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.lookup(id).is_some()
    }

    /// Serialized length of an index over `count` blocks.
    pub fn encoded_len(count: usize) -> usize {
        FAN_OUT_LEN + count * ROW_LEN
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::encoded_len(self.block_count()));
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for id in &self.block_ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }
        for &offset in &self.offsets {
            buf.extend_from_slice(&offset.to_be_bytes());
        }
        buf
    }

    /// Deserialize an index that must describe exactly `count` blocks.
    pub fn from_bytes(data: &[u8], count: usize) -> ArchiveResult<Self> {
        if data.len() != Self::encoded_len(count) {
            return Err(ArchiveError::IndexCorrupted(format!(
                "expected {} bytes for {count} blocks, got {}",
                Self::encoded_len(count),
                data.len()
            )));
        }

        let mut chunks = data.chunks_exact(4);
        let mut fan_out = [0u32; 256];
        for entry in &mut fan_out {
            *entry = read_u32(chunks.next())?;
        }
        if fan_out[255] as usize != count || fan_out.windows(2).any(|w| w[0] > w[1]) {
            return Err(ArchiveError::IndexCorrupted("inconsistent fan-out table".into()));
        }

        let mut pos = FAN_OUT_LEN;
        let mut block_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = BlockId::from_slice(&data[pos..pos + 32])
                .map_err(|e| ArchiveError::IndexCorrupted(e.to_string()))?;
            block_ids.push(id);
            pos += 32;
        }
        if block_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ArchiveError::IndexCorrupted("block ids are not sorted".into()));
        }

        let mut crc32s = Vec::with_capacity(count);
        for chunk in data[pos..pos + count * 4].chunks_exact(4) {
            crc32s.push(read_u32(Some(chunk))?);
        }
        pos += count * 4;

        let mut offsets = Vec::with_capacity(count);
        for chunk in data[pos..pos + count * 8].chunks_exact(8) {
            let bytes: [u8; 8] = chunk
                .try_into()
                .map_err(|_| ArchiveError::IndexCorrupted("offset truncated".into()))?;
            offsets.push(u64::from_be_bytes(bytes));
        }

        Ok(Self {
            fan_out,
            block_ids,
            crc32s,
            offsets,
        })
    }
}

fn read_u32(chunk: Option<&[u8]>) -> ArchiveResult<u32> {
    let bytes: [u8; 4] = chunk
        .and_then(|c| c.try_into().ok())
        .ok_or_else(|| ArchiveError::IndexCorrupted("u32 truncated".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ids(n: usize) -> Vec<BlockId> {
        (0..n)
            .map(|i| {
                let mut data = [0u8; 32];
                data[0] = (i * 37 % 256) as u8;
                data[1] = (i / 256) as u8;
                data[2] = i as u8;
                BlockId::from_hash(data)
            })
            .collect()
    }

    fn build(ids: &[BlockId]) -> ArchiveIndex {
        ArchiveIndex::build(
            ids.iter()
                .enumerate()
                .map(|(i, id)| (*id, (i * 7) as u32, (i * 50) as u64))
                .collect(),
        )
    }

    #[test]
    fn empty_index() {
        let idx = ArchiveIndex::build(vec![]);
        assert_eq!(idx.block_count(), 0);
        assert!(idx.fan_out.iter().all(|&c| c == 0));
        assert!(!idx.contains(&BlockId::from_hash([0; 32])));
    }

    #[test]
    fn lookup_present_and_missing() {
        let ids = make_ids(300);
        let idx = build(&ids);
        assert_eq!(idx.block_count(), 300);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(idx.lookup(id), Some(((i * 50) as u64, (i * 7) as u32)));
        }
        assert!(idx.lookup(&BlockId::from_hash([0xEE; 32])).is_none());
    }

    #[test]
    fn fan_out_is_cumulative() {
        let idx = build(&make_ids(300));
        assert_eq!(idx.fan_out[255], 300);
        assert!(idx.fan_out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn serialization_roundtrip() {
        let ids = make_ids(20);
        let idx = build(&ids);
        let bytes = idx.to_bytes();
        assert_eq!(bytes.len(), ArchiveIndex::encoded_len(20));
        assert_eq!(ArchiveIndex::from_bytes(&bytes, 20).unwrap(), idx);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = build(&make_ids(3)).to_bytes();
        assert!(matches!(
            ArchiveIndex::from_bytes(&bytes, 4),
            Err(ArchiveError::IndexCorrupted(_))
        ));
        assert!(ArchiveIndex::from_bytes(&bytes[..10], 3).is_err());
    }

    #[test]
    fn inconsistent_fan_out_is_rejected() {
        let mut bytes = build(&make_ids(3)).to_bytes();
        // Make the last fan-out bucket disagree with the count.
        bytes[FAN_OUT_LEN - 1] = 9;
        assert!(matches!(
            ArchiveIndex::from_bytes(&bytes, 3),
            Err(ArchiveError::IndexCorrupted(_))
        ));
    }
}

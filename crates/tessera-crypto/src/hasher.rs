use tessera_types::BlockId;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a block digest and a key digest over identical bytes never
/// collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored blocks. A block's [`BlockId`] is this hash of its bytes.
    pub const BLOCK: Self = Self {
        domain: "tessera-block-v1",
    };
    /// Hasher for tree keys; feeds the level computation in [`crate::boundary`].
    pub const KEY: Self = Self {
        domain: "tessera-key-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> BlockId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        BlockId::from_hash(*hasher.finalize().as_bytes())
    }
}

//! Content-addressed blocks (spec §3).

/// 32-byte sha256 digest identifying a block's content.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub [u8; 32]);

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A block reference inside a file's ordered block list (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub offset: u64,
    pub size: u32,
    pub hash: BlockHash,
    pub weak_hash: u32,
}

/// Row for a content-addressed block, deduplicated across the whole
/// cluster by `hash`. `ref_count` is the number of file-infos referencing
/// it; when it drops to zero the block is garbage and a `remove_blocks`
/// diff drops the row (spec §3 Block lifecycle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: BlockHash,
    pub size: u32,
    pub weak_hash: u32,
    pub ref_count: u64,
}

impl BlockInfo {
    pub fn new(hash: BlockHash, size: u32, weak_hash: u32) -> Self {
        Self { hash, size, weak_hash, ref_count: 0 }
    }
}

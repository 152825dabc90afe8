//! File-info — one named entry inside a folder-info (spec §3).

use uuid::Uuid;

use crate::model::block::BlockRef;
use crate::model::device::DeviceId;
use crate::model::version_vector::VersionVector;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileInfoId(pub Uuid);

impl FileInfoId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

/// One named entry in a folder (spec §3). Invariants enforced by
/// [`FileInfo::validate`]: `deleted ⇒ blocks.is_empty()`,
/// `size > 0 ⇒ !blocks.is_empty()`, `size == Σ block.size`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub id: FileInfoId,
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub permissions: u32,
    pub modified_s: i64,
    pub modified_ns: u32,
    pub modified_by: DeviceId,
    pub deleted: bool,
    pub invalid: bool,
    pub no_permissions: bool,
    pub symlink_target: Option<String>,
    pub block_size: u32,
    pub sequence: u64,
    pub blocks: Vec<BlockRef>,
    pub version: VersionVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileInfoError {
    #[error("file size does not match the sum of its block sizes")]
    MismatchFileSize,
    #[error("file-info carries an empty version vector")]
    MissingVersion,
    #[error("deleted file-info carries a non-empty block list")]
    DeletedWithBlocks,
}

impl FileInfo {
    /// Validates the invariants from spec §3 / §8 boundary behaviors.
    pub fn validate(&self) -> Result<(), FileInfoError> {
        if self.version.is_empty() {
            return Err(FileInfoError::MissingVersion);
        }
        if self.deleted && !self.blocks.is_empty() {
            return Err(FileInfoError::DeletedWithBlocks);
        }
        let sum: u64 = self.blocks.iter().map(|b| b.size as u64).sum();
        if sum != self.size {
            return Err(FileInfoError::MismatchFileSize);
        }
        Ok(())
    }

    /// True if `self` and `other` describe the exact same bytes/metadata —
    /// used to treat a sequence-regressing but byte-identical IndexUpdate
    /// entry as an idempotent replay (spec §8).
    pub fn byte_identical(&self, other: &FileInfo) -> bool {
        self.name == other.name
            && self.entry_type == other.entry_type
            && self.size == other.size
            && self.permissions == other.permissions
            && self.modified_s == other.modified_s
            && self.modified_ns == other.modified_ns
            && self.deleted == other.deleted
            && self.symlink_target == other.symlink_target
            && self.blocks == other.blocks
            && self.version == other.version
    }

    pub fn is_zero_content(&self) -> bool {
        self.deleted || matches!(self.entry_type, EntryType::Directory | EntryType::Symlink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::block::BlockHash;
    use crate::model::version_vector::{ShortDeviceId, VersionEntry};

    fn base_file() -> FileInfo {
        FileInfo {
            id: FileInfoId::generate(),
            name: "hello.txt".into(),
            entry_type: EntryType::File,
            size: 5,
            permissions: 0o644,
            modified_s: 0,
            modified_ns: 0,
            modified_by: DeviceId([0u8; 32]),
            deleted: false,
            invalid: false,
            no_permissions: false,
            symlink_target: None,
            block_size: 128 << 10,
            sequence: 1,
            blocks: vec![BlockRef { offset: 0, size: 5, hash: BlockHash([1u8; 32]), weak_hash: 0 }],
            version: VersionVector::from_entries(vec![VersionEntry {
                id: ShortDeviceId(1),
                value: 1,
            }]),
        }
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut f = base_file();
        f.size = 6;
        assert_eq!(f.validate(), Err(FileInfoError::MismatchFileSize));
    }

    #[test]
    fn rejects_empty_version() {
        let mut f = base_file();
        f.version = VersionVector::new();
        assert_eq!(f.validate(), Err(FileInfoError::MissingVersion));
    }

    #[test]
    fn rejects_deleted_with_blocks() {
        let mut f = base_file();
        f.deleted = true;
        assert_eq!(f.validate(), Err(FileInfoError::DeletedWithBlocks));
    }

    #[test]
    fn accepts_well_formed_file() {
        assert!(base_file().validate().is_ok());
    }
}

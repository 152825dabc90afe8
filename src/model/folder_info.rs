//! Folder-info — a device's view of one folder (spec §3).

use uuid::Uuid;

use crate::model::device::DeviceId;
use crate::model::file_info::FileInfo;
use crate::model::folder::FolderId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FolderInfoId(pub Uuid);

impl FolderInfoId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Per-(folder, device) row (spec §3). `index_id` is the device's own
/// monotonic stream identifier for this folder; when it changes the whole
/// folder must be re-fetched from that device (glossary: "index id").
/// `max_sequence` is the highest sequence number observed from that device.
#[derive(Debug, Clone)]
pub struct FolderInfo {
    pub id: FolderInfoId,
    pub folder: FolderId,
    pub device: DeviceId,
    pub index_id: u64,
    pub max_sequence: u64,
    pub introducer_device_key: Option<DeviceId>,
    files_by_uuid: std::collections::HashMap<uuid::Uuid, FileInfo>,
    files_by_name: std::collections::HashMap<String, uuid::Uuid>,
}

impl FolderInfo {
    pub fn new(folder: FolderId, device: DeviceId, index_id: u64) -> Self {
        Self {
            id: FolderInfoId::generate(),
            folder,
            device,
            index_id,
            max_sequence: 0,
            introducer_device_key: None,
            files_by_uuid: std::collections::HashMap::new(),
            files_by_name: std::collections::HashMap::new(),
        }
    }

    pub fn file_by_name(&self, name: &str) -> Option<&FileInfo> {
        self.files_by_name.get(name).and_then(|id| self.files_by_uuid.get(id))
    }

    pub fn file_by_uuid(&self, id: uuid::Uuid) -> Option<&FileInfo> {
        self.files_by_uuid.get(&id)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileInfo> {
        self.files_by_uuid.values()
    }

    /// Inserts or replaces the file-info for `file.name`. The uuid never
    /// changes for an unchanged name (spec §3: "updated in place when its
    /// name is unchanged").
    pub fn upsert_file(&mut self, file: FileInfo) {
        if let Some(existing_id) = self.files_by_name.get(&file.name).copied() {
            if existing_id != file.id.0 {
                self.files_by_uuid.remove(&existing_id);
            }
        }
        self.files_by_name.insert(file.name.clone(), file.id.0);
        self.max_sequence = self.max_sequence.max(file.sequence);
        self.files_by_uuid.insert(file.id.0, file);
    }

    pub fn remove_file(&mut self, id: uuid::Uuid) -> Option<FileInfo> {
        let removed = self.files_by_uuid.remove(&id)?;
        self.files_by_name.remove(&removed.name);
        Some(removed)
    }

    pub fn next_sequence(&self) -> u64 {
        self.max_sequence + 1
    }

    pub fn bump_sequence(&mut self) -> u64 {
        self.max_sequence += 1;
        self.max_sequence
    }
}

/// `files_by_name` is a derived index over `files_by_uuid`; comparing the
/// latter is sufficient and avoids double-counting a divergence.
impl PartialEq for FolderInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.folder == other.folder
            && self.device == other.device
            && self.index_id == other.index_id
            && self.max_sequence == other.max_sequence
            && self.introducer_device_key == other.introducer_device_key
            && self.files_by_uuid == other.files_by_uuid
    }
}

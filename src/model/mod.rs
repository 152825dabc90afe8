//! The cluster state engine (spec §4.2): a single in-process authoritative
//! model of devices, folders, files, and blocks, mutated exclusively
//! through the diff tree in [`crate::diff`].

pub mod block;
pub mod device;
pub mod file_info;
pub mod folder;
pub mod folder_info;
pub mod pending;
pub mod version_vector;

use std::collections::HashMap;

use thiserror::Error;

pub use block::{BlockHash, BlockInfo, BlockRef};
pub use device::{Device, DeviceId};
pub use file_info::{FileInfo, FileInfoId};
pub use folder::{Folder, FolderId};
pub use folder_info::{FolderInfo, FolderInfoId};
pub use pending::{IgnoredDevice, IgnoredFolder, PendingDevice, PendingFolder};
pub use version_vector::{AdvanceAction, VersionVector};

/// Errors raised while mutating the cluster model. A non-recoverable one
/// (any variant here) taints the cluster (spec §4.1 "Failure discipline").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("cluster is tainted, diff application rejected")]
    Tainted,
    #[error("unknown device {0:?}")]
    UnknownDevice(DeviceId),
    #[error("unknown folder {0:?}")]
    UnknownFolder(FolderId),
    #[error("no folder-info for folder {folder:?} device {device:?}")]
    UnknownFolderInfo { folder: FolderId, device: DeviceId },
    #[error("duplicate folder-info for folder {folder:?} device {device:?}")]
    DuplicateFolderInfo { folder: FolderId, device: DeviceId },
    #[error("file-info invariant violated: {0}")]
    InvalidFileInfo(#[from] file_info::FileInfoError),
    #[error("inbound sequence {got} is not strictly greater than stored max {max}")]
    SequenceRegression { got: u64, max: u64 },
    #[error("referenced block {0} is not present in the cluster")]
    UnknownBlock(BlockHash),
}

/// In-memory graph of devices, folders, folder-infos, files, and blocks
/// (spec §4.2). All lookups here are plain `HashMap` gets — O(1) average,
/// as required.
pub struct Cluster {
    pub local_device: DeviceId,
    devices: HashMap<DeviceId, Device>,
    folders: HashMap<FolderId, Folder>,
    folder_infos: HashMap<FolderInfoId, FolderInfo>,
    folder_info_index: HashMap<(FolderId, DeviceId), FolderInfoId>,
    blocks: HashMap<BlockHash, BlockInfo>,
    ignored_devices: HashMap<DeviceId, IgnoredDevice>,
    ignored_folders: HashMap<FolderId, IgnoredFolder>,
    pending_devices: HashMap<DeviceId, PendingDevice>,
    pending_folders: HashMap<FolderId, PendingFolder>,
    tainted: bool,
    write_requests_budget: i64,
}

impl Cluster {
    pub fn new(local_device: DeviceId, write_requests_budget: i64) -> Self {
        Self {
            local_device,
            devices: HashMap::new(),
            folders: HashMap::new(),
            folder_infos: HashMap::new(),
            folder_info_index: HashMap::new(),
            blocks: HashMap::new(),
            ignored_devices: HashMap::new(),
            ignored_folders: HashMap::new(),
            pending_devices: HashMap::new(),
            pending_folders: HashMap::new(),
            tainted: false,
            write_requests_budget,
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub fn taint(&mut self) {
        self.tainted = true;
    }

    /// Guard every `apply` entry point calls first (spec §4.1).
    pub fn check_not_tainted(&self) -> Result<(), ModelError> {
        if self.tainted {
            Err(ModelError::Tainted)
        } else {
            Ok(())
        }
    }

    // -- devices ---------------------------------------------------------

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn device_mut(&mut self, id: &DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub fn upsert_device(&mut self, device: Device) {
        self.devices.insert(device.id, device);
    }

    /// Removing a device cascades to every folder-info it owns (spec §3).
    pub fn remove_device(&mut self, id: &DeviceId) -> Vec<FolderInfoId> {
        self.devices.remove(id);
        let victims: Vec<FolderInfoId> = self
            .folder_info_index
            .iter()
            .filter(|((_, dev), _)| dev == id)
            .map(|(_, fi)| *fi)
            .collect();
        for fi in &victims {
            self.remove_folder_info(*fi);
        }
        victims
    }

    // -- folders -----------------------------------------------------------

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    pub fn folder(&self, id: &FolderId) -> Option<&Folder> {
        self.folders.get(id)
    }

    pub fn folder_mut(&mut self, id: &FolderId) -> Option<&mut Folder> {
        self.folders.get_mut(id)
    }

    pub fn upsert_folder(&mut self, folder: Folder) {
        self.folders.insert(folder.id.clone(), folder);
    }

    pub fn remove_folder(&mut self, id: &FolderId) -> Vec<FolderInfoId> {
        self.folders.remove(id);
        let victims: Vec<FolderInfoId> = self
            .folder_info_index
            .iter()
            .filter(|((folder, _), _)| folder == id)
            .map(|(_, fi)| *fi)
            .collect();
        for fi in &victims {
            self.remove_folder_info(*fi);
        }
        victims
    }

    // -- folder-infos --------------------------------------------------

    pub fn folder_info(&self, id: FolderInfoId) -> Option<&FolderInfo> {
        self.folder_infos.get(&id)
    }

    pub fn folder_info_mut(&mut self, id: FolderInfoId) -> Option<&mut FolderInfo> {
        self.folder_infos.get_mut(&id)
    }

    pub fn folder_info_for(&self, folder: &FolderId, device: &DeviceId) -> Option<&FolderInfo> {
        self.folder_info_index.get(&(folder.clone(), *device)).and_then(|id| self.folder_infos.get(id))
    }

    pub fn folder_info_for_mut(
        &mut self,
        folder: &FolderId,
        device: &DeviceId,
    ) -> Option<&mut FolderInfo> {
        let id = *self.folder_info_index.get(&(folder.clone(), *device))?;
        self.folder_infos.get_mut(&id)
    }

    /// Views of a folder across all participating devices.
    pub fn folder_infos_of_folder(&self, folder: &FolderId) -> impl Iterator<Item = &FolderInfo> {
        self.folder_info_index
            .iter()
            .filter(move |((f, _), _)| f == folder)
            .filter_map(move |(_, id)| self.folder_infos.get(id))
    }

    /// Lazily-computed "remote views" back-index from a device to all the
    /// folder-infos it owns (spec §3: device holds only a weak back-index,
    /// never ownership).
    pub fn remote_folder_infos(&self, device: &DeviceId) -> impl Iterator<Item = &FolderInfo> {
        self.folder_info_index
            .iter()
            .filter(move |((_, d), _)| d == device)
            .filter_map(move |(_, id)| self.folder_infos.get(id))
    }

    pub fn folder_infos_all(&self) -> impl Iterator<Item = &FolderInfo> {
        self.folder_infos.values()
    }

    /// Invariant: at most one folder-info per (folder, device) (spec §3).
    pub fn upsert_folder_info(&mut self, fi: FolderInfo) -> Result<(), ModelError> {
        let key = (fi.folder.clone(), fi.device);
        if let Some(existing) = self.folder_info_index.get(&key) {
            if *existing != fi.id {
                return Err(ModelError::DuplicateFolderInfo { folder: fi.folder, device: fi.device });
            }
        }
        self.folder_info_index.insert(key, fi.id);
        self.folder_infos.insert(fi.id, fi);
        Ok(())
    }

    pub fn remove_folder_info(&mut self, id: FolderInfoId) -> Option<FolderInfo> {
        let fi = self.folder_infos.remove(&id)?;
        self.folder_info_index.remove(&(fi.folder.clone(), fi.device));
        Some(fi)
    }

    // -- blocks ------------------------------------------------------------

    pub fn block(&self, hash: &BlockHash) -> Option<&BlockInfo> {
        self.blocks.get(hash)
    }

    /// Adds a block row if new, otherwise bumps its reference count
    /// (spec §3 dedup: "two files sharing an identical block share the
    /// block row").
    pub fn add_block_ref(&mut self, hash: BlockHash, size: u32, weak_hash: u32) {
        self.blocks
            .entry(hash)
            .and_modify(|b| b.ref_count += 1)
            .or_insert_with(|| {
                let mut info = BlockInfo::new(hash, size, weak_hash);
                info.ref_count = 1;
                info
            });
    }

    /// Drops one reference; removes the row when it reaches zero. Returns
    /// true if the row was actually removed (garbage-collected).
    pub fn release_block_ref(&mut self, hash: &BlockHash) -> bool {
        let Some(info) = self.blocks.get_mut(hash) else { return false };
        info.ref_count = info.ref_count.saturating_sub(1);
        if info.ref_count == 0 {
            self.blocks.remove(hash);
            true
        } else {
            false
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockInfo> {
        self.blocks.values()
    }

    // -- ignored / pending --------------------------------------------------

    pub fn ignore_device(&mut self, row: IgnoredDevice) {
        self.ignored_devices.insert(row.id, row);
    }

    pub fn is_ignored_device(&self, id: &DeviceId) -> bool {
        self.ignored_devices.contains_key(id)
    }

    pub fn ignore_folder(&mut self, row: IgnoredFolder) {
        self.ignored_folders.insert(row.folder.clone(), row);
    }

    pub fn is_ignored_folder(&self, id: &FolderId) -> bool {
        self.ignored_folders.contains_key(id)
    }

    pub fn unignore_folder(&mut self, id: &FolderId) -> Option<IgnoredFolder> {
        self.ignored_folders.remove(id)
    }

    pub fn add_pending_device(&mut self, row: PendingDevice) {
        self.pending_devices.insert(row.id, row);
    }

    pub fn remove_pending_device(&mut self, id: &DeviceId) -> Option<PendingDevice> {
        self.pending_devices.remove(id)
    }

    pub fn pending_devices(&self) -> impl Iterator<Item = &PendingDevice> {
        self.pending_devices.values()
    }

    pub fn add_pending_folder(&mut self, row: PendingFolder) {
        self.pending_folders.insert(row.folder.clone(), row);
    }

    pub fn remove_pending_folder(&mut self, id: &FolderId) -> Option<PendingFolder> {
        self.pending_folders.remove(id)
    }

    pub fn pending_folders(&self) -> impl Iterator<Item = &PendingFolder> {
        self.pending_folders.values()
    }

    // -- write-request budget (spec §4.2 back-pressure) ---------------------

    pub fn try_acquire_write_slot(&mut self) -> bool {
        if self.write_requests_budget > 0 {
            self.write_requests_budget -= 1;
            true
        } else {
            false
        }
    }

    pub fn release_write_slot(&mut self) {
        self.write_requests_budget += 1;
    }
}

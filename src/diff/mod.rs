//! The diff tree (spec §4.1): every cluster mutation is an immutable node
//! with an optional `child` (applied/visited first) and `sibling` (applied
//! next), built eagerly by the constructors in [`builders`].

pub mod builders;

use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    BlockHash, Cluster, Device, DeviceId, Folder, FolderId, FolderInfo, FolderInfoId, IgnoredDevice,
    IgnoredFolder, ModelError, PendingDevice, PendingFolder,
};
use crate::model::device::DeviceState;
use crate::model::file_info::FileInfo;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<DiffError> for crate::error::Error {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Model(m) => m.into(),
        }
    }
}

/// One block row to add, carried by `AddBlocks` (spec §4.1: "add-blocks for
/// blocks new to the cluster").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    pub hash: BlockHash,
    pub size: u32,
    pub weak_hash: u32,
}

/// The concrete effect of one diff node. Each variant is the smallest unit
/// `apply` knows how to perform; composite operations in [`builders`] chain
/// several of these as child/sibling.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffKind {
    /// Root marker for a peer-cluster-update tree; carries no effect of its
    /// own, exists so visitors can recognize the whole operation.
    PeerClusterUpdate { device: DeviceId },
    /// Root marker for an `advance` tree (spec §4.1).
    AdvanceRoot { folder: FolderId, device: DeviceId, file: FileInfoId },
    /// Root marker for an `update_folder` tree (peer Index/IndexUpdate).
    UpdateFolderRoot { folder: FolderId, device: DeviceId },

    UpsertDevice(Device),
    RemoveDevice(DeviceId),
    IgnoreDevice(IgnoredDevice),
    AddPendingDevice(PendingDevice),
    RemovePendingDevice(DeviceId),

    UpsertFolder(Folder),
    RemoveFolder(FolderId),
    IgnoreFolder(IgnoredFolder),
    AddPendingFolder(PendingFolder),
    RemovePendingFolder(FolderId),

    /// Bumps a folder-info's `index_id` ahead of replacing its files,
    /// signalling "the peer restarted its index for this folder" (spec
    /// §4.1 "reset folder-infos").
    ResetFolderInfo { folder: FolderId, device: DeviceId, new_index_id: u64 },
    UpsertFolderInfo(FolderInfo),
    RemoveFolderInfo(FolderInfoId),

    AddBlocks(Vec<BlockSpec>),
    RemoveBlocks(Vec<BlockHash>),

    /// Inserts or replaces one file-info inside the named folder-info.
    UpsertFile { folder: FolderId, device: DeviceId, file: FileInfo },
    RemoveCorruptedFile { folder: FolderId, device: DeviceId, file: Uuid },

    PeerState { device: DeviceId, state: DeviceState },
    BlockAcknowledgement { folder: FolderId, device: DeviceId, file: Uuid, block: BlockHash },
    IoFailure(crate::error::IoFailure),

    ScanFinish { folder: FolderId },
    /// Yields the runtime mid-load so other work can proceed (spec §4.3).
    Interrupt,
    Commit,
}

/// A node in the diff tree (spec §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct DiffNode {
    pub kind: DiffKind,
    pub child: Option<Box<DiffNode>>,
    pub sibling: Option<Box<DiffNode>>,
}

impl DiffNode {
    pub fn leaf(kind: DiffKind) -> Self {
        Self { kind, child: None, sibling: None }
    }

    pub fn with_child(mut self, child: DiffNode) -> Self {
        self.child = Some(Box::new(child));
        self
    }

    pub fn with_sibling(mut self, sibling: DiffNode) -> Self {
        self.sibling = Some(Box::new(sibling));
        self
    }

    /// Applies own effect, then child, then sibling (spec §4.1). On error
    /// the cluster is tainted and the error propagates; no further node in
    /// the tree is applied.
    pub fn apply(
        &self,
        cluster: &mut Cluster,
        ctl: &mut dyn ApplyController,
    ) -> Result<(), DiffError> {
        cluster.check_not_tainted()?;
        ctl.before_apply(&self.kind, cluster);
        if let Err(err) = apply_kind(&self.kind, cluster) {
            cluster.taint();
            return Err(err.into());
        }
        ctl.after_apply(&self.kind, cluster)?;
        if let Some(child) = &self.child {
            child.apply(cluster, ctl)?;
        }
        if let Some(sibling) = &self.sibling {
            sibling.apply(cluster, ctl)?;
        }
        Ok(())
    }

    /// Pure notification pass: child then sibling (spec §4.1).
    pub fn visit(&self, visitor: &mut dyn DiffVisitor) -> Result<(), crate::error::Error> {
        visitor.visit(&self.kind)?;
        if let Some(child) = &self.child {
            child.visit(visitor)?;
        }
        if let Some(sibling) = &self.sibling {
            sibling.visit(visitor)?;
        }
        Ok(())
    }
}

/// Indirection point between "mutate memory" and "also journal it" (spec
/// §4.1). The database actor implements this to write each node's row
/// inside one write transaction shared across the whole tree.
pub trait ApplyController {
    /// Runs before the in-memory mutation, with the cluster still in its
    /// pre-mutation state. The only hook that can see a row a `Remove*`
    /// diff is about to drop — `after_apply` only gets the cluster as it
    /// is *after* the row is already gone (spec §4.3).
    fn before_apply(&mut self, _kind: &DiffKind, _cluster: &Cluster) {}
    fn after_apply(&mut self, _kind: &DiffKind, _cluster: &Cluster) -> Result<(), DiffError> {
        Ok(())
    }
}

/// No-op controller: applies to memory only, never journals.
pub struct NullApplyController;

impl ApplyController for NullApplyController {}

fn apply_kind(kind: &DiffKind, cluster: &mut Cluster) -> Result<(), ModelError> {
    match kind {
        DiffKind::PeerClusterUpdate { .. }
        | DiffKind::AdvanceRoot { .. }
        | DiffKind::UpdateFolderRoot { .. }
        | DiffKind::ScanFinish { .. }
        | DiffKind::Interrupt
        | DiffKind::Commit => Ok(()),

        DiffKind::UpsertDevice(device) => {
            cluster.upsert_device(device.clone());
            Ok(())
        }
        DiffKind::RemoveDevice(id) => {
            cluster.remove_device(id);
            Ok(())
        }
        DiffKind::IgnoreDevice(row) => {
            cluster.ignore_device(row.clone());
            Ok(())
        }
        DiffKind::AddPendingDevice(row) => {
            cluster.add_pending_device(row.clone());
            Ok(())
        }
        DiffKind::RemovePendingDevice(id) => {
            cluster.remove_pending_device(id);
            Ok(())
        }

        DiffKind::UpsertFolder(folder) => {
            cluster.upsert_folder(folder.clone());
            Ok(())
        }
        DiffKind::RemoveFolder(id) => {
            cluster.remove_folder(id);
            Ok(())
        }
        DiffKind::IgnoreFolder(row) => {
            cluster.ignore_folder(row.clone());
            Ok(())
        }
        DiffKind::AddPendingFolder(row) => {
            cluster.add_pending_folder(row.clone());
            Ok(())
        }
        DiffKind::RemovePendingFolder(id) => {
            cluster.remove_pending_folder(id);
            Ok(())
        }

        DiffKind::ResetFolderInfo { folder, device, new_index_id } => {
            let fi = cluster
                .folder_info_for_mut(folder, device)
                .ok_or_else(|| ModelError::UnknownFolderInfo { folder: folder.clone(), device: *device })?;
            fi.index_id = *new_index_id;
            fi.max_sequence = 0;
            Ok(())
        }
        DiffKind::UpsertFolderInfo(fi) => cluster.upsert_folder_info(fi.clone()),
        DiffKind::RemoveFolderInfo(id) => {
            cluster.remove_folder_info(*id);
            Ok(())
        }

        DiffKind::AddBlocks(blocks) => {
            for b in blocks {
                cluster.add_block_ref(b.hash, b.size, b.weak_hash);
            }
            Ok(())
        }
        DiffKind::RemoveBlocks(hashes) => {
            for h in hashes {
                cluster.release_block_ref(h);
            }
            Ok(())
        }

        DiffKind::UpsertFile { folder, device, file } => {
            file.validate()?;
            let fi = cluster
                .folder_info_for_mut(folder, device)
                .ok_or_else(|| ModelError::UnknownFolderInfo { folder: folder.clone(), device: *device })?;
            fi.upsert_file(file.clone());
            Ok(())
        }
        DiffKind::RemoveCorruptedFile { folder, device, file } => {
            let fi = cluster
                .folder_info_for_mut(folder, device)
                .ok_or_else(|| ModelError::UnknownFolderInfo { folder: folder.clone(), device: *device })?;
            fi.remove_file(*file);
            Ok(())
        }

        DiffKind::PeerState { device, state } => {
            let dev = cluster.device_mut(device).ok_or(ModelError::UnknownDevice(*device))?;
            let accept = state.token() > dev.state.token()
                || (state.token() == dev.state.token() && !dev.state.can_rollback_to(state));
            if accept {
                dev.state = state.clone();
            }
            Ok(())
        }
        DiffKind::BlockAcknowledgement { .. } => Ok(()),
        DiffKind::IoFailure(_) => Ok(()),
    }
}

/// Side-effect dispatch on a diff tree (spec §4.1 `visit`). Every method has
/// a no-op default; implementors override the ones they care about (send to
/// a peer, wake the UI, enqueue a rescan).
pub trait DiffVisitor {
    fn on_peer_cluster_update(&mut self, _device: &DeviceId) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_advance(&mut self, _folder: &FolderId, _device: &DeviceId, _file: FileInfoId) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_update_folder(&mut self, _folder: &FolderId, _device: &DeviceId) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_upsert_device(&mut self, _device: &Device) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_remove_device(&mut self, _id: &DeviceId) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_upsert_folder(&mut self, _folder: &Folder) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_remove_folder(&mut self, _id: &FolderId) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_upsert_folder_info(&mut self, _fi: &FolderInfo) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_upsert_file(&mut self, _folder: &FolderId, _device: &DeviceId, _file: &FileInfo) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_peer_state(&mut self, _device: &DeviceId, _state: &DeviceState) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_block_acknowledgement(
        &mut self,
        _folder: &FolderId,
        _device: &DeviceId,
        _file: Uuid,
        _block: &BlockHash,
    ) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_io_failure(&mut self, _failure: &crate::error::IoFailure) -> Result<(), crate::error::Error> {
        Ok(())
    }
    fn on_scan_finish(&mut self, _folder: &FolderId) -> Result<(), crate::error::Error> {
        Ok(())
    }

    fn visit(&mut self, kind: &DiffKind) -> Result<(), crate::error::Error> {
        match kind {
            DiffKind::PeerClusterUpdate { device } => self.on_peer_cluster_update(device),
            DiffKind::AdvanceRoot { folder, device, file } => self.on_advance(folder, device, *file),
            DiffKind::UpdateFolderRoot { folder, device } => self.on_update_folder(folder, device),
            DiffKind::UpsertDevice(device) => self.on_upsert_device(device),
            DiffKind::RemoveDevice(id) => self.on_remove_device(id),
            DiffKind::UpsertFolder(folder) => self.on_upsert_folder(folder),
            DiffKind::RemoveFolder(id) => self.on_remove_folder(id),
            DiffKind::UpsertFolderInfo(fi) => self.on_upsert_folder_info(fi),
            DiffKind::UpsertFile { folder, device, file } => self.on_upsert_file(folder, device, file),
            DiffKind::PeerState { device, state } => self.on_peer_state(device, state),
            DiffKind::BlockAcknowledgement { folder, device, file, block } => {
                self.on_block_acknowledgement(folder, device, *file, block)
            }
            DiffKind::IoFailure(failure) => self.on_io_failure(failure),
            DiffKind::ScanFinish { folder } => self.on_scan_finish(folder),
            _ => Ok(()),
        }
    }
}

//! Composite diff constructors (spec §4.1): each builds an eager tree with
//! a deterministic child/sibling order.

use uuid::Uuid;

use super::{BlockSpec, DiffKind, DiffNode};
use crate::model::file_info::FileInfo;
use crate::model::folder_info::FolderInfo;
use crate::model::{BlockHash, DeviceId, FolderId, FolderInfoId, PendingFolder};

fn chain(mut nodes: Vec<DiffNode>) -> Option<DiffNode> {
    let mut rev = nodes.drain(..).rev();
    let mut acc = rev.next()?;
    for mut node in rev {
        node.sibling = Some(Box::new(acc));
        acc = node;
    }
    Some(acc)
}

/// What the peer controller decided for one folder the peer advertised
/// (spec §4.1: "decide one of {new pending, confirmed existing, reset, reshared}").
pub struct PeerClusterUpdateInput {
    pub device: DeviceId,
    /// Folder-infos whose peer index_id changed: bump index_id, wipe sequence.
    pub resets: Vec<(FolderId, u64)>,
    /// Folder-infos to create or refresh in place.
    pub upserts: Vec<FolderInfo>,
    /// Folder-infos that no longer correspond to anything the peer offers.
    pub removed_folder_infos: Vec<FolderInfoId>,
    /// Blocks orphaned by the folder-infos above, now garbage.
    pub orphaned_blocks: Vec<BlockHash>,
    pub removed_pending_folders: Vec<FolderId>,
    /// Folders we used to have a folder-info for, but lost — re-offered.
    pub reshared: Vec<PendingFolder>,
    pub new_pending: Vec<PendingFolder>,
    /// Brand-new remote folder-infos, added last so GC above can't orphan them.
    pub remote_upserts: Vec<FolderInfo>,
}

/// Builds the *peer cluster update* tree (spec §4.1). Ordering: reset →
/// upsert → remove-folder-infos → remove-blocks → remove-pending-folders →
/// reshare → add-pending → add-remote-folder-infos.
pub fn peer_cluster_update(input: PeerClusterUpdateInput) -> DiffNode {
    let mut children = Vec::new();
    for (folder, new_index_id) in input.resets {
        children.push(DiffNode::leaf(DiffKind::ResetFolderInfo { folder, device: input.device, new_index_id }));
    }
    for fi in input.upserts {
        children.push(DiffNode::leaf(DiffKind::UpsertFolderInfo(fi)));
    }
    for id in input.removed_folder_infos {
        children.push(DiffNode::leaf(DiffKind::RemoveFolderInfo(id)));
    }
    if !input.orphaned_blocks.is_empty() {
        children.push(DiffNode::leaf(DiffKind::RemoveBlocks(input.orphaned_blocks)));
    }
    for folder in input.removed_pending_folders {
        children.push(DiffNode::leaf(DiffKind::RemovePendingFolder(folder)));
    }
    for pf in input.reshared {
        children.push(DiffNode::leaf(DiffKind::AddPendingFolder(pf)));
    }
    for pf in input.new_pending {
        children.push(DiffNode::leaf(DiffKind::AddPendingFolder(pf)));
    }
    for fi in input.remote_upserts {
        children.push(DiffNode::leaf(DiffKind::UpsertFolderInfo(fi)));
    }

    let root = DiffNode::leaf(DiffKind::PeerClusterUpdate { device: input.device });
    match chain(children) {
        Some(head) => root.with_child(head),
        None => root,
    }
}

/// Builds an *advance* tree (spec §4.1: `remote_copy` / `resolve_remote_win`
/// / `local_update`). `new_blocks` are hashes not previously known to the
/// cluster; `orphaned_blocks` are the ones the overwritten file-info used to
/// reference and no longer does.
pub fn advance(
    folder: FolderId,
    device: DeviceId,
    file: FileInfo,
    new_blocks: Vec<BlockSpec>,
    orphaned_blocks: Vec<BlockHash>,
) -> DiffNode {
    let file_id = file.id;
    let mut root = DiffNode::leaf(DiffKind::AdvanceRoot { folder: folder.clone(), device, file: file_id });

    let mut children = Vec::new();
    if !new_blocks.is_empty() {
        children.push(DiffNode::leaf(DiffKind::AddBlocks(new_blocks)));
    }
    if !orphaned_blocks.is_empty() {
        children.push(DiffNode::leaf(DiffKind::RemoveBlocks(orphaned_blocks)));
    }
    let upsert = DiffNode::leaf(DiffKind::UpsertFile { folder, device, file });
    children.push(upsert);

    if let Some(head) = chain(children) {
        root = root.with_child(head);
    }
    root
}

/// Builds an *update folder* tree for a peer's Index / IndexUpdate message
/// (spec §4.1). `files` is already validated and deduplicated by name,
/// keeping the last occurrence, by the caller (the peer controller).
pub fn update_folder(
    folder: FolderId,
    device: DeviceId,
    files: Vec<FileInfo>,
    new_blocks: Vec<BlockSpec>,
    orphaned_blocks: Vec<BlockHash>,
) -> DiffNode {
    let root = DiffNode::leaf(DiffKind::UpdateFolderRoot { folder: folder.clone(), device });

    let mut children = Vec::new();
    if !new_blocks.is_empty() {
        children.push(DiffNode::leaf(DiffKind::AddBlocks(new_blocks)));
    }
    if !orphaned_blocks.is_empty() {
        children.push(DiffNode::leaf(DiffKind::RemoveBlocks(orphaned_blocks)));
    }
    for file in files {
        children.push(DiffNode::leaf(DiffKind::UpsertFile { folder: folder.clone(), device, file }));
    }

    match chain(children) {
        Some(head) => root.with_child(head),
        None => root,
    }
}

/// One block successfully written; records availability and frees its slot
/// (spec §4.1, §4.4 step 4).
pub fn block_acknowledgement(
    folder: FolderId,
    device: DeviceId,
    file: Uuid,
    block: BlockHash,
) -> DiffNode {
    DiffNode::leaf(DiffKind::BlockAcknowledgement { folder, device, file, block })
}

/// Records a filesystem failure without mutating cluster state (spec §7).
pub fn io_failure(failure: crate::error::IoFailure) -> DiffNode {
    DiffNode::leaf(DiffKind::IoFailure(failure))
}

/// Updates a device's runtime connection state, e.g. on connect/disconnect
/// or a local-discovery beacon (spec §4.4, §6.2).
pub fn peer_state(device: DeviceId, state: crate::model::device::DeviceState) -> DiffNode {
    DiffNode::leaf(DiffKind::PeerState { device, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::DeviceState;
    use crate::model::file_info::EntryType;
    use crate::model::version_vector::{ShortDeviceId, VersionEntry, VersionVector};
    use crate::model::{Cluster, Device, Folder};

    fn dev(n: u8) -> DeviceId {
        DeviceId([n; 32])
    }

    fn sample_file(id: Uuid, seq: u64) -> FileInfo {
        FileInfo {
            id: crate::model::FileInfoId(id),
            name: "a.txt".into(),
            entry_type: EntryType::File,
            size: 0,
            permissions: 0o644,
            modified_s: 0,
            modified_ns: 0,
            modified_by: dev(1),
            deleted: false,
            invalid: false,
            no_permissions: false,
            symlink_target: None,
            block_size: 128 << 10,
            sequence: seq,
            blocks: vec![],
            version: VersionVector::from_entries(vec![VersionEntry { id: ShortDeviceId(1), value: 1 }]),
        }
    }

    #[test]
    fn advance_applies_file_and_blocks_in_order() {
        let mut cluster = Cluster::new(dev(0), 8);
        let folder = FolderId("f1".into());
        cluster.upsert_folder(Folder::new(folder.clone(), "F1", "/tmp/f1".into()));
        cluster.upsert_device(Device::new(dev(1), "peer"));
        cluster
            .upsert_folder_info(FolderInfo::new(folder.clone(), dev(0), 1))
            .unwrap();

        let file = sample_file(Uuid::new_v4(), 1);
        let tree = advance(folder.clone(), dev(0), file.clone(), vec![], vec![]);
        let mut ctl = super::super::NullApplyController;
        tree.apply(&mut cluster, &mut ctl).unwrap();

        let fi = cluster.folder_info_for(&folder, &dev(0)).unwrap();
        assert!(fi.file_by_name("a.txt").is_some());
        assert_eq!(fi.max_sequence, 1);
    }

    #[test]
    fn peer_cluster_update_empty_input_still_applies_root() {
        let mut cluster = Cluster::new(dev(0), 8);
        let tree = peer_cluster_update(PeerClusterUpdateInput {
            device: dev(1),
            resets: vec![],
            upserts: vec![],
            removed_folder_infos: vec![],
            orphaned_blocks: vec![],
            removed_pending_folders: vec![],
            reshared: vec![],
            new_pending: vec![],
            remote_upserts: vec![],
        });
        let mut ctl = super::super::NullApplyController;
        assert!(tree.apply(&mut cluster, &mut ctl).is_ok());
    }

    #[test]
    fn peer_cluster_update_orders_children() {
        let device = dev(1);
        let folder = FolderId("f1".into());
        let fi = FolderInfo::new(folder.clone(), device, 7);
        let input = PeerClusterUpdateInput {
            device,
            resets: vec![(folder.clone(), 2)],
            upserts: vec![fi],
            removed_folder_infos: vec![],
            orphaned_blocks: vec![BlockHash([1u8; 32])],
            removed_pending_folders: vec![],
            reshared: vec![],
            new_pending: vec![],
            remote_upserts: vec![],
        };
        let tree = peer_cluster_update(input);
        let mut order = Vec::new();
        let mut node = tree.child.as_deref();
        while let Some(n) = node {
            order.push(std::mem::discriminant(&n.kind));
            node = n.sibling.as_deref();
        }
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], std::mem::discriminant(&DiffKind::ResetFolderInfo {
            folder: FolderId(String::new()),
            device,
            new_index_id: 0,
        }));
    }
}

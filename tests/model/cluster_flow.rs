//! Exercises the cluster model and diff tree together through the public
//! crate API, the way a caller outside `syncspirit` would.

use syncspirit::diff::builders::{advance, peer_cluster_update, PeerClusterUpdateInput};
use syncspirit::diff::{DiffKind, DiffNode, NullApplyController};
use syncspirit::model::device::Device;
use syncspirit::model::file_info::{EntryType, FileInfo, FileInfoId};
use syncspirit::model::folder::Folder;
use syncspirit::model::folder_info::FolderInfo;
use syncspirit::model::version_vector::{ShortDeviceId, VersionEntry, VersionVector};
use syncspirit::model::{Cluster, DeviceId, FolderId};

fn dev(n: u8) -> DeviceId {
    DeviceId([n; 32])
}

fn file(name: &str, seq: u64) -> FileInfo {
    FileInfo {
        id: FileInfoId::generate(),
        name: name.into(),
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
        version: VersionVector::from_entries(vec![VersionEntry { id: ShortDeviceId(1), value: seq }]),
    }
}

#[test]
fn sharing_a_folder_then_advancing_a_file_is_visible_through_cluster_api() {
    let mut cluster = Cluster::new(dev(0), 16);
    let mut ctl = NullApplyController;
    let folder = FolderId("docs".into());

    DiffNode::leaf(DiffKind::UpsertFolder(Folder::new(folder.clone(), "Documents", "/tmp/docs".into())))
        .apply(&mut cluster, &mut ctl)
        .unwrap();
    DiffNode::leaf(DiffKind::UpsertDevice(Device::new(dev(1), "laptop")))
        .apply(&mut cluster, &mut ctl)
        .unwrap();
    DiffNode::leaf(DiffKind::UpsertFolderInfo(FolderInfo::new(folder.clone(), dev(0), 1)))
        .apply(&mut cluster, &mut ctl)
        .unwrap();

    let tree = advance(folder.clone(), dev(0), file("a.txt", 1), vec![], vec![]);
    tree.apply(&mut cluster, &mut ctl).unwrap();

    let fi = cluster.folder_info_for(&folder, &dev(0)).unwrap();
    assert!(fi.file_by_name("a.txt").is_some());
    assert_eq!(fi.max_sequence, 1);
}

#[test]
fn removing_a_device_cascades_its_folder_info_out_of_the_cluster() {
    let mut cluster = Cluster::new(dev(0), 16);
    let mut ctl = NullApplyController;
    let folder = FolderId("docs".into());

    cluster.upsert_folder(Folder::new(folder.clone(), "Documents", "/tmp/docs".into()));
    let fi = FolderInfo::new(folder.clone(), dev(1), 1);
    let fi_id = fi.id;
    cluster.upsert_folder_info(fi).unwrap();
    cluster.upsert_device(Device::new(dev(1), "laptop"));

    DiffNode::leaf(DiffKind::RemoveDevice(dev(1))).apply(&mut cluster, &mut ctl).unwrap();

    assert!(cluster.device(&dev(1)).is_none());
    assert!(cluster.folder_info(fi_id).is_none());
    assert!(cluster.folder_info_for(&folder, &dev(1)).is_none());
}

#[test]
fn peer_cluster_update_resets_index_and_wipes_sequence_before_new_folder_infos() {
    let mut cluster = Cluster::new(dev(0), 16);
    let mut ctl = NullApplyController;
    let folder = FolderId("docs".into());
    let peer = dev(1);

    cluster.upsert_device(Device::new(peer, "laptop"));
    let mut existing = FolderInfo::new(folder.clone(), peer, 5);
    existing.upsert_file(file("old.txt", 3));
    cluster.upsert_folder_info(existing).unwrap();

    let refreshed = FolderInfo::new(folder.clone(), peer, 6);
    let tree = peer_cluster_update(PeerClusterUpdateInput {
        device: peer,
        resets: vec![(folder.clone(), 6)],
        upserts: vec![],
        removed_folder_infos: vec![],
        orphaned_blocks: vec![],
        removed_pending_folders: vec![],
        reshared: vec![],
        new_pending: vec![],
        remote_upserts: vec![],
    });
    tree.apply(&mut cluster, &mut ctl).unwrap();

    let fi = cluster.folder_info_for(&folder, &peer).unwrap();
    assert_eq!(fi.index_id, 6);
    assert_eq!(fi.max_sequence, 0);
    let _ = refreshed;
}

#[test]
fn a_failing_diff_taints_the_cluster_and_blocks_every_later_mutation() {
    let mut cluster = Cluster::new(dev(0), 16);
    let mut ctl = NullApplyController;

    let bad = DiffNode::leaf(DiffKind::ResetFolderInfo {
        folder: FolderId("missing".into()),
        device: dev(9),
        new_index_id: 1,
    });
    assert!(bad.apply(&mut cluster, &mut ctl).is_err());
    assert!(cluster.is_tainted());

    let harmless = DiffNode::leaf(DiffKind::UpsertDevice(Device::new(dev(2), "other")));
    assert!(harmless.apply(&mut cluster, &mut ctl).is_err());
    assert!(cluster.device(&dev(2)).is_none());
}

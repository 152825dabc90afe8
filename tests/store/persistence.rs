//! Exercises `Store` against a real on-disk `redb` file, and the
//! `DatabaseActor` journal/`load_tree` round trip through the diff tree.

use std::sync::Arc;

use syncspirit::diff::{DiffKind, DiffNode, NullApplyController};
use syncspirit::model::block::{BlockHash, BlockInfo};
use syncspirit::model::device::Device;
use syncspirit::model::folder::Folder;
use syncspirit::model::folder_info::FolderInfo;
use syncspirit::model::{Cluster, DeviceId, FolderId};
use syncspirit::store::actor::DatabaseActor;
use syncspirit::store::Store;

fn dev(n: u8) -> DeviceId {
    DeviceId([n; 32])
}

fn open_store(dir: &tempfile::TempDir) -> Arc<Store> {
    Arc::new(Store::open(&dir.path().join("cluster.redb")).unwrap())
}

#[test]
fn devices_and_folders_survive_a_put_then_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.redb");

    {
        let store = Store::open(&path).unwrap();
        store.put_device(&Device::new(dev(1), "laptop")).unwrap();
        store.put_folder(&Folder::new(FolderId("docs".into()), "Documents", "/tmp/docs".into())).unwrap();
    }

    let reopened = Store::open(&path).unwrap();
    let devices = reopened.load_devices().unwrap();
    let folders = reopened.load_folders().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "laptop");
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].id, FolderId("docs".into()));
}

#[test]
fn folder_info_round_trips_with_its_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let folder = FolderId("docs".into());
    let mut fi = FolderInfo::new(folder.clone(), dev(1), 3);
    fi.upsert_file(syncspirit::model::file_info::FileInfo {
        id: syncspirit::model::FileInfoId::generate(),
        name: "a.txt".into(),
        entry_type: syncspirit::model::file_info::EntryType::File,
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
        sequence: 1,
        blocks: vec![],
        version: syncspirit::model::VersionVector::new(),
    });
    store.put_folder_info(&fi).unwrap();

    let loaded = store.load_folder_infos().unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].file_by_name("a.txt").is_some());
}

#[test]
fn removing_a_block_row_means_it_is_absent_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.redb");
    let hash = BlockHash([3u8; 32]);

    {
        let store = Store::open(&path).unwrap();
        store.put_block(&BlockInfo { hash, size: 128, weak_hash: 0, ref_count: 1 }).unwrap();
        store.remove_block(&hash).unwrap();
    }

    let reopened = Store::open(&path).unwrap();
    let chunks = reopened.load_blocks_chunked(64).unwrap();
    assert!(chunks.iter().flatten().all(|b| b.hash != hash));
}

#[test]
fn opening_an_existing_database_does_not_downgrade_its_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.redb");
    Store::open(&path).unwrap();
    // Reopening an already-migrated database must succeed without error.
    assert!(Store::open(&path).is_ok());
}

#[test]
fn database_actor_journals_every_mutation_so_a_fresh_cluster_can_replay_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let mut seed_cluster = Cluster::new(dev(0), 8);
    let mut actor = DatabaseActor::new(store.clone());

    let folder = FolderId("docs".into());
    DiffNode::leaf(DiffKind::UpsertDevice(Device::new(dev(1), "laptop")))
        .apply(&mut seed_cluster, &mut actor)
        .unwrap();
    DiffNode::leaf(DiffKind::UpsertFolder(Folder::new(folder.clone(), "Documents", "/tmp/docs".into())))
        .apply(&mut seed_cluster, &mut actor)
        .unwrap();
    DiffNode::leaf(DiffKind::UpsertFolderInfo(FolderInfo::new(folder, dev(0), 1)))
        .apply(&mut seed_cluster, &mut actor)
        .unwrap();

    let replay_actor = DatabaseActor::new(store);
    let tree = replay_actor.load_tree().unwrap().expect("replay tree is non-empty");

    let mut fresh = Cluster::new(dev(0), 8);
    let mut ctl = NullApplyController;
    tree.apply(&mut fresh, &mut ctl).unwrap();

    assert!(fresh.device(&dev(1)).is_some());
    assert!(fresh.folder(&FolderId("docs".into())).is_some());
    assert!(fresh.folder_info_for(&FolderId("docs".into()), &dev(0)).is_some());
}

#[test]
fn repair_corruption_drops_files_whose_blocks_are_missing_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let actor = DatabaseActor::new(store);

    let folder = FolderId("docs".into());
    let mut cluster = Cluster::new(dev(0), 8);
    cluster.upsert_folder(Folder::new(folder.clone(), "Documents", "/tmp/docs".into()));
    cluster.upsert_device(Device::new(dev(1), "laptop"));
    let mut fi = FolderInfo::new(folder.clone(), dev(1), 1);
    let missing_hash = BlockHash([9u8; 32]);
    fi.upsert_file(syncspirit::model::file_info::FileInfo {
        id: syncspirit::model::FileInfoId::generate(),
        name: "corrupt.bin".into(),
        entry_type: syncspirit::model::file_info::EntryType::File,
        size: 4,
        permissions: 0o644,
        modified_s: 0,
        modified_ns: 0,
        modified_by: dev(1),
        deleted: false,
        invalid: false,
        no_permissions: false,
        symlink_target: None,
        block_size: 128 << 10,
        sequence: 1,
        blocks: vec![syncspirit::model::block::BlockRef { offset: 0, size: 4, hash: missing_hash, weak_hash: 0 }],
        version: syncspirit::model::VersionVector::new(),
    });
    cluster.upsert_folder_info(fi).unwrap();

    let repair = actor.repair_corruption(&cluster).expect("a repair tree since the block is missing");
    let mut ctl = NullApplyController;
    repair.apply(&mut cluster, &mut ctl).unwrap();

    let fi = cluster.folder_info_for(&folder, &dev(1)).unwrap();
    assert!(fi.file_by_name("corrupt.bin").is_none());
}

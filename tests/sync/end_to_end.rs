//! End-to-end scenarios spanning the scanner, diff tree, durability layer,
//! and the device connection-state lattice together, the way the daemon's
//! coordinator loop actually drives them.

use std::sync::Arc;

use syncspirit::diff::builders::peer_state;
use syncspirit::diff::{DiffKind, DiffNode, NullApplyController};
use syncspirit::hasher::HasherPool;
use syncspirit::model::device::{ConnectionState, Device, DeviceState};
use syncspirit::model::folder::Folder;
use syncspirit::model::folder_info::FolderInfo;
use syncspirit::model::{Cluster, DeviceId, FolderId};
use syncspirit::scanner::{ScanBudget, Scanner, TickOutcome};
use syncspirit::store::actor::DatabaseActor;
use syncspirit::store::Store;

fn dev(n: u8) -> DeviceId {
    DeviceId([n; 32])
}

#[tokio::test]
async fn a_local_scan_survives_a_simulated_restart() {
    let workdir = tempfile::tempdir().unwrap();
    std::fs::write(workdir.path().join("notes.txt"), b"meeting notes").unwrap();

    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("cluster.redb");
    let local = dev(0);
    let folder = FolderId("docs".into());

    {
        let store = Arc::new(Store::open(&db_path).unwrap());
        let mut actor = DatabaseActor::new(store);
        let mut cluster = Cluster::new(local, 64);

        DiffNode::leaf(DiffKind::UpsertFolder(Folder::new(folder.clone(), "Documents", workdir.path().to_path_buf())))
            .apply(&mut cluster, &mut actor)
            .unwrap();
        DiffNode::leaf(DiffKind::UpsertFolderInfo(FolderInfo::new(folder.clone(), local, 1)))
            .apply(&mut cluster, &mut actor)
            .unwrap();

        let (hasher, mut results, _workers) = HasherPool::spawn(2, 16);
        let mut scanner = Scanner::new(folder.clone(), local, workdir.path().to_path_buf(), hasher);
        loop {
            match scanner.tick(&cluster, ScanBudget::default()).await {
                TickOutcome::Diff(diff) => diff.apply(&mut cluster, &mut actor).unwrap(),
                TickOutcome::BudgetExhausted => {
                    if let Some(result) = results.recv().await {
                        if let Some(diff) = scanner.on_hash_result(result) {
                            diff.apply(&mut cluster, &mut actor).unwrap();
                        }
                    }
                }
                TickOutcome::Done => break,
            }
        }

        let fi = cluster.folder_info_for(&folder, &local).unwrap();
        assert!(fi.file_by_name("notes.txt").is_some());
    }

    // Simulated restart: fresh process, same database file.
    let store = Arc::new(Store::open(&db_path).unwrap());
    let actor = DatabaseActor::new(store);
    let tree = actor.load_tree().unwrap().expect("replay tree is non-empty");

    let mut restarted = Cluster::new(local, 64);
    let mut ctl = NullApplyController;
    tree.apply(&mut restarted, &mut ctl).unwrap();

    let fi = restarted.folder_info_for(&folder, &local).unwrap();
    assert!(fi.file_by_name("notes.txt").is_some());
}

#[tokio::test]
async fn a_stale_reconnect_cannot_roll_a_device_back_to_an_older_epochs_state() {
    let mut cluster = Cluster::new(dev(0), 8);
    let mut ctl = NullApplyController;
    let peer = dev(1);
    cluster.upsert_device(Device::new(peer, "laptop"));

    // First connection: goes online.
    let online = DeviceState::offline(0).with_connection(ConnectionState::Connected);
    peer_state(peer, online).apply(&mut cluster, &mut ctl).unwrap();
    assert_eq!(cluster.device(&peer).unwrap().state.token(), 0);

    // Disconnect bumps the epoch.
    let next_epoch = cluster.device(&peer).unwrap().state.next_epoch();
    peer_state(peer, next_epoch).apply(&mut cluster, &mut ctl).unwrap();
    assert_eq!(cluster.device(&peer).unwrap().state.token(), 1);
    assert_eq!(cluster.device(&peer).unwrap().state.connection, ConnectionState::Offline);

    // A stale "Connected" event from the old epoch must not resurrect it.
    let stale = DeviceState::offline(0).with_connection(ConnectionState::Connected);
    peer_state(peer, stale).apply(&mut cluster, &mut ctl).unwrap();
    assert_eq!(cluster.device(&peer).unwrap().state.token(), 1);
    assert_eq!(cluster.device(&peer).unwrap().state.connection, ConnectionState::Offline);

    // A fresh observation in the current epoch does take effect.
    let current = DeviceState::offline(1).with_connection(ConnectionState::Connecting);
    peer_state(peer, current).apply(&mut cluster, &mut ctl).unwrap();
    assert_eq!(cluster.device(&peer).unwrap().state.connection, ConnectionState::Connecting);
}

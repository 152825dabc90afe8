//! Exercises the scheduler against a real `Cluster`: a folder that is
//! synchronizing or paused must not be popped by `next_request`.

use std::time::{Duration, Instant};

use syncspirit::model::folder::Folder;
use syncspirit::model::{Cluster, DeviceId, FolderId};
use syncspirit::scheduler::{ScanRequest, Scheduler};

fn dev() -> DeviceId {
    DeviceId([1u8; 32])
}

#[test]
fn a_synchronizing_folder_is_skipped_until_sync_ends() {
    let mut cluster = Cluster::new(dev(), 8);
    let folder = FolderId("docs".into());
    cluster.upsert_folder(Folder::new(folder.clone(), "Documents", "/tmp/docs".into()));

    let mut scheduler = Scheduler::new();
    scheduler.request(ScanRequest { folder: folder.clone(), sub_dir: None });

    cluster.folder(&folder).unwrap().begin_sync();
    assert!(scheduler.next_request(&cluster).is_none());

    cluster.folder(&folder).unwrap().end_sync();
    let popped = scheduler.next_request(&cluster).unwrap();
    assert_eq!(popped.folder, folder);
}

#[test]
fn a_paused_folder_never_becomes_runnable() {
    let mut cluster = Cluster::new(dev(), 8);
    let folder = FolderId("docs".into());
    let mut f = Folder::new(folder.clone(), "Documents", "/tmp/docs".into());
    f.flags.paused = true;
    cluster.upsert_folder(f);

    let mut scheduler = Scheduler::new();
    scheduler.request(ScanRequest { folder: folder.clone(), sub_dir: None });
    assert!(scheduler.next_request(&cluster).is_none());
}

#[test]
fn on_scan_finish_rearms_the_folders_deadline() {
    let mut cluster = Cluster::new(dev(), 8);
    let folder = FolderId("docs".into());
    cluster.upsert_folder(Folder::new(folder.clone(), "Documents", "/tmp/docs".into()));

    let mut scheduler = Scheduler::new();
    let now = Instant::now();
    assert!(scheduler.next_deadline(now).is_none());

    scheduler.on_scan_finish(folder.clone(), Duration::from_secs(10));
    assert!(scheduler.next_deadline(now).is_some());

    let due = scheduler.due_folders(now + Duration::from_secs(11));
    assert_eq!(due, vec![folder]);
    assert!(scheduler.next_deadline(now + Duration::from_secs(11)).is_none());
}

#[test]
fn a_request_for_an_unknown_folder_never_comes_back_out() {
    let cluster = Cluster::new(dev(), 8);
    let mut scheduler = Scheduler::new();
    scheduler.request(ScanRequest { folder: FolderId("ghost".into()), sub_dir: None });
    assert!(scheduler.next_request(&cluster).is_none());
}

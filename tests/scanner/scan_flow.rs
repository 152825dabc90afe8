//! Walks a real temp directory through `Scanner` the way the daemon's
//! `run_scan` loop does: tick until budget-exhausted or done, draining
//! hasher results as they arrive.

use syncspirit::diff::{DiffKind, NullApplyController};
use syncspirit::hasher::HasherPool;
use syncspirit::model::device::Device;
use syncspirit::model::folder::Folder;
use syncspirit::model::folder_info::FolderInfo;
use syncspirit::model::{Cluster, DeviceId, FolderId};
use syncspirit::scanner::{ScanBudget, Scanner, TickOutcome};

fn dev(n: u8) -> DeviceId {
    DeviceId([n; 32])
}

#[tokio::test]
async fn scanning_a_fresh_directory_discovers_every_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/c.txt"), b"nested").unwrap();

    let folder = FolderId("docs".into());
    let local = dev(0);
    let mut cluster = Cluster::new(local, 64);
    cluster.upsert_folder(Folder::new(folder.clone(), "Documents", dir.path().to_path_buf()));
    cluster.upsert_device(Device::new(local, "this-node"));
    cluster.upsert_folder_info(FolderInfo::new(folder.clone(), local, 1)).unwrap();

    let (hasher, mut results, _workers) = HasherPool::spawn(2, 16);
    let mut scanner = Scanner::new(folder.clone(), local, dir.path().to_path_buf(), hasher);

    let budget = ScanBudget::default();
    loop {
        match scanner.tick(&cluster, budget).await {
            TickOutcome::Diff(diff) => {
                let mut ctl = NullApplyController;
                diff.apply(&mut cluster, &mut ctl).unwrap();
            }
            TickOutcome::BudgetExhausted => {
                if let Ok(result) = results.try_recv() {
                    if let Some(diff) = scanner.on_hash_result(result) {
                        let mut ctl = NullApplyController;
                        diff.apply(&mut cluster, &mut ctl).unwrap();
                    }
                } else {
                    if let Some(result) = results.recv().await {
                        if let Some(diff) = scanner.on_hash_result(result) {
                            let mut ctl = NullApplyController;
                            diff.apply(&mut cluster, &mut ctl).unwrap();
                        }
                    }
                }
            }
            TickOutcome::Done => break,
        }
    }

    let fi = cluster.folder_info_for(&folder, &local).unwrap();
    assert!(fi.file_by_name("a.txt").is_some());
    assert!(fi.file_by_name("b.txt").is_some());
    assert!(fi.file_by_name("sub/c.txt").is_some());
}

#[tokio::test]
async fn a_file_deleted_from_disk_produces_a_removal_diff_on_rescan() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();
    std::fs::write(dir.path().join("gone.txt"), b"y").unwrap();

    let folder = FolderId("docs".into());
    let local = dev(0);
    let mut cluster = Cluster::new(local, 64);
    cluster.upsert_folder(Folder::new(folder.clone(), "Documents", dir.path().to_path_buf()));
    cluster.upsert_device(Device::new(local, "this-node"));
    cluster.upsert_folder_info(FolderInfo::new(folder.clone(), local, 1)).unwrap();

    {
        let (hasher, mut results, _workers) = HasherPool::spawn(2, 16);
        let mut scanner = Scanner::new(folder.clone(), local, dir.path().to_path_buf(), hasher);
        loop {
            match scanner.tick(&cluster, ScanBudget::default()).await {
                TickOutcome::Diff(diff) => {
                    let mut ctl = NullApplyController;
                    diff.apply(&mut cluster, &mut ctl).unwrap();
                }
                TickOutcome::BudgetExhausted => {
                    if let Some(result) = results.recv().await {
                        if let Some(diff) = scanner.on_hash_result(result) {
                            let mut ctl = NullApplyController;
                            diff.apply(&mut cluster, &mut ctl).unwrap();
                        }
                    }
                }
                TickOutcome::Done => break,
            }
        }
    }
    assert!(cluster.folder_info_for(&folder, &local).unwrap().file_by_name("gone.txt").is_some());

    std::fs::remove_file(dir.path().join("gone.txt")).unwrap();

    let (hasher, _results, _workers) = HasherPool::spawn(2, 16);
    let mut scanner = Scanner::new(folder.clone(), local, dir.path().to_path_buf(), hasher);
    let mut saw_removal = false;
    loop {
        match scanner.tick(&cluster, ScanBudget::default()).await {
            TickOutcome::Diff(diff) => {
                if matches!(diff.kind, DiffKind::AdvanceRoot { .. }) {
                    if let Some(child) = &diff.child {
                        if let DiffKind::UpsertFile { file, .. } = &child.kind {
                            if file.name == "gone.txt" {
                                saw_removal = file.deleted;
                            }
                        }
                    }
                }
                let mut ctl = NullApplyController;
                diff.apply(&mut cluster, &mut ctl).unwrap();
            }
            TickOutcome::BudgetExhausted => continue,
            TickOutcome::Done => break,
        }
    }

    assert!(saw_removal);
}

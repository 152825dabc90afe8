//! Journals diff-tree mutations into the store as they land on the
//! in-memory cluster, and replays the store back into a diff tree at
//! startup (spec §4.3).

use std::sync::Arc;

use crate::diff::{ApplyController, BlockSpec, DiffError, DiffKind, DiffNode};
use crate::model::Cluster;
use crate::store::{Store, StoreError};

/// Rows loaded per `Interrupt`-separated chunk during startup replay.
const LOAD_CHUNK_SIZE: usize = 256;

fn chain(mut nodes: Vec<DiffNode>) -> Option<DiffNode> {
    let mut rev = nodes.drain(..).rev();
    let mut acc = rev.next()?;
    for mut node in rev {
        node.sibling = Some(Box::new(acc));
        acc = node;
    }
    Some(acc)
}

/// Implements [`ApplyController`] so every in-memory mutation is mirrored
/// into the store inside the same diff-tree walk, and builds the synthetic
/// load tree consumed once at startup.
pub struct DatabaseActor {
    store: Arc<Store>,
}

impl DatabaseActor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Builds the startup replay tree (spec §4.3): devices, ignored/pending
    /// devices and folders, then folder-infos with their files and blocks
    /// in chunks, each chunk separated by `Interrupt` so the runtime gets a
    /// chance to run other tasks while a large database loads.
    pub fn load_tree(&self) -> Result<Option<DiffNode>, StoreError> {
        let mut nodes = Vec::new();

        for device in self.store.load_devices()? {
            nodes.push(DiffNode::leaf(DiffKind::UpsertDevice(device)));
        }
        for row in self.store.load_ignored_devices()? {
            nodes.push(DiffNode::leaf(DiffKind::IgnoreDevice(row)));
        }
        for row in self.store.load_pending_devices()? {
            nodes.push(DiffNode::leaf(DiffKind::AddPendingDevice(row)));
        }
        for folder in self.store.load_folders()? {
            nodes.push(DiffNode::leaf(DiffKind::UpsertFolder(folder)));
        }
        for row in self.store.load_ignored_folders()? {
            nodes.push(DiffNode::leaf(DiffKind::IgnoreFolder(row)));
        }
        for row in self.store.load_pending_folders()? {
            nodes.push(DiffNode::leaf(DiffKind::AddPendingFolder(row)));
        }
        nodes.push(DiffNode::leaf(DiffKind::Interrupt));

        for fi in self.store.load_folder_infos()? {
            let folder = fi.folder.clone();
            let device = fi.device;
            let files: Vec<_> = fi.files().cloned().collect();
            nodes.push(DiffNode::leaf(DiffKind::UpsertFolderInfo(fi)));
            for chunk in files.chunks(LOAD_CHUNK_SIZE) {
                for file in chunk {
                    nodes.push(DiffNode::leaf(DiffKind::UpsertFile {
                        folder: folder.clone(),
                        device,
                        file: file.clone(),
                    }));
                }
                nodes.push(DiffNode::leaf(DiffKind::Interrupt));
            }
        }

        for chunk in self.store.load_blocks_chunked(LOAD_CHUNK_SIZE)? {
            let specs = chunk
                .into_iter()
                .map(|b| BlockSpec { hash: b.hash, size: b.size, weak_hash: b.weak_hash })
                .collect();
            nodes.push(DiffNode::leaf(DiffKind::AddBlocks(specs)));
            nodes.push(DiffNode::leaf(DiffKind::Interrupt));
        }

        nodes.push(DiffNode::leaf(DiffKind::Commit));
        Ok(chain(nodes))
    }

    /// Walks every loaded folder-info for file-infos referencing a block
    /// hash the block table no longer has, and returns a repair tree that
    /// drops those rows (spec §4.3 corruption recovery). Run once after
    /// `load_tree` has been applied, before the cluster starts serving
    /// peers.
    pub fn repair_corruption(&self, cluster: &Cluster) -> Option<DiffNode> {
        let mut repairs = Vec::new();
        for fi in cluster.folder_infos_all() {
            for file in fi.files() {
                let missing = file.blocks.iter().any(|b| cluster.block(&b.hash).is_none());
                if missing {
                    repairs.push(DiffNode::leaf(DiffKind::RemoveCorruptedFile {
                        folder: fi.folder.clone(),
                        device: fi.device,
                        file: file.id.0,
                    }));
                }
            }
        }
        chain(repairs)
    }

    fn journal(&self, kind: &DiffKind, cluster: &Cluster) -> Result<(), StoreError> {
        match kind {
            DiffKind::UpsertDevice(device) => self.store.put_device(device),
            DiffKind::RemoveDevice(id) => self.store.remove_device(id),
            DiffKind::IgnoreDevice(row) => self.store.put_ignored_device(row),
            DiffKind::AddPendingDevice(row) => self.store.put_pending_device(row),
            DiffKind::UpsertFolder(folder) => self.store.put_folder(folder),
            DiffKind::RemoveFolder(id) => self.store.remove_folder(id),
            DiffKind::IgnoreFolder(row) => self.store.put_ignored_folder(row),
            DiffKind::AddPendingFolder(row) => self.store.put_pending_folder(row),
            DiffKind::ResetFolderInfo { folder, device, .. } | DiffKind::UpsertFile { folder, device, .. } => {
                if let Some(fi) = cluster.folder_info_for(folder, device) {
                    self.store.put_folder_info(fi)?;
                }
                Ok(())
            }
            DiffKind::UpsertFolderInfo(fi) => self.store.put_folder_info(fi),
            DiffKind::AddBlocks(specs) => {
                for spec in specs {
                    if let Some(block) = cluster.block(&spec.hash) {
                        self.store.put_block(block)?;
                    }
                }
                Ok(())
            }
            DiffKind::RemoveBlocks(hashes) => {
                for hash in hashes {
                    if cluster.block(hash).is_none() {
                        self.store.remove_block(hash)?;
                    }
                }
                Ok(())
            }
            DiffKind::RemoveCorruptedFile { folder, device, .. } => {
                if let Some(fi) = cluster.folder_info_for(folder, device) {
                    self.store.put_folder_info(fi)?;
                }
                Ok(())
            }
            // RemovePendingDevice/RemovePendingFolder/RemoveFolderInfo are
            // journaled in `before_apply`, while the cluster still has the
            // row being removed; nothing left to do once the in-memory
            // mutation has already landed.
            DiffKind::RemovePendingDevice(_)
            | DiffKind::RemovePendingFolder(_)
            | DiffKind::RemoveFolderInfo(_)
            | DiffKind::PeerClusterUpdate { .. }
            | DiffKind::AdvanceRoot { .. }
            | DiffKind::UpdateFolderRoot { .. }
            | DiffKind::PeerState { .. }
            | DiffKind::BlockAcknowledgement { .. }
            | DiffKind::IoFailure(_)
            | DiffKind::ScanFinish { .. }
            | DiffKind::Interrupt
            | DiffKind::Commit => Ok(()),
        }
    }

    /// Journals the `Remove*` diffs whose store key can't be reconstructed
    /// once the in-memory row is gone, using the cluster's still-current
    /// pre-mutation state (spec §4.3).
    fn journal_removal(&self, kind: &DiffKind, cluster: &Cluster) -> Result<(), StoreError> {
        match kind {
            DiffKind::RemovePendingDevice(id) => self.store.remove_pending_device(id),
            DiffKind::RemovePendingFolder(id) => self.store.remove_pending_folder(id),
            DiffKind::RemoveFolderInfo(id) => match cluster.folder_info(*id) {
                Some(fi) => self.store.remove_folder_info(fi),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

impl ApplyController for DatabaseActor {
    fn before_apply(&mut self, kind: &DiffKind, cluster: &Cluster) {
        if let Err(err) = self.journal_removal(kind, cluster) {
            tracing::error!(error = %err, "failed to journal diff removal to store");
        }
    }

    fn after_apply(&mut self, kind: &DiffKind, cluster: &Cluster) -> Result<(), DiffError> {
        if let Err(err) = self.journal(kind, cluster) {
            tracing::error!(error = %err, "failed to journal diff to store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::{Compression, Device};
    use crate::model::DeviceId;

    fn temp_store() -> Arc<Store> {
        let path = std::env::temp_dir().join(format!("syncspirit-actor-test-{}.redb", uuid::Uuid::new_v4()));
        Arc::new(Store::open(&path).unwrap())
    }

    #[test]
    fn journals_upserted_device_and_reloads_it() {
        let store = temp_store();
        let mut actor = DatabaseActor::new(store.clone());
        let mut cluster = Cluster::new(DeviceId([0u8; 32]), 8);

        let mut device = Device::new(DeviceId([5u8; 32]), "peer");
        device.compression = Compression::Always;
        let diff = DiffNode::leaf(DiffKind::UpsertDevice(device));
        diff.apply(&mut cluster, &mut actor).unwrap();

        let reloaded = store.load_devices().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].name, "peer");
    }

    #[test]
    fn removing_a_pending_device_drops_it_from_the_store() {
        use crate::model::device::ContactUri;
        use crate::model::pending::PendingDevice;

        let store = temp_store();
        let mut actor = DatabaseActor::new(store.clone());
        let mut cluster = Cluster::new(DeviceId([0u8; 32]), 8);
        let id = DeviceId([7u8; 32]);

        let upsert = DiffNode::leaf(DiffKind::AddPendingDevice(PendingDevice {
            id,
            last_seen: ContactUri("tcp://1.2.3.4".into()),
            name: "stranger".into(),
        }));
        upsert.apply(&mut cluster, &mut actor).unwrap();
        assert_eq!(store.load_pending_devices().unwrap().len(), 1);

        let remove = DiffNode::leaf(DiffKind::RemovePendingDevice(id));
        remove.apply(&mut cluster, &mut actor).unwrap();
        assert!(store.load_pending_devices().unwrap().is_empty());
    }

    #[test]
    fn removing_a_pending_folder_drops_it_from_the_store() {
        use crate::model::pending::PendingFolder;

        let store = temp_store();
        let mut actor = DatabaseActor::new(store.clone());
        let mut cluster = Cluster::new(DeviceId([0u8; 32]), 8);
        let folder = crate::model::folder::FolderId("f1".into());

        let upsert = DiffNode::leaf(DiffKind::AddPendingFolder(PendingFolder {
            folder: folder.clone(),
            label: "stuff".into(),
            offered_by: DeviceId([8u8; 32]),
            index_id: 1,
            max_sequence: 0,
        }));
        upsert.apply(&mut cluster, &mut actor).unwrap();
        assert_eq!(store.load_pending_folders().unwrap().len(), 1);

        let remove = DiffNode::leaf(DiffKind::RemovePendingFolder(folder));
        remove.apply(&mut cluster, &mut actor).unwrap();
        assert!(store.load_pending_folders().unwrap().is_empty());
    }

    #[test]
    fn removing_a_folder_info_cascades_to_its_files_in_the_store() {
        use crate::model::file_info::{EntryType, FileInfo, FileInfoId};
        use crate::model::folder::FolderId;
        use crate::model::folder_info::FolderInfo;
        use crate::model::version_vector::{ShortDeviceId, VersionVector};

        let store = temp_store();
        let mut actor = DatabaseActor::new(store.clone());
        let mut cluster = Cluster::new(DeviceId([0u8; 32]), 8);
        let folder = FolderId("f1".into());
        let device = DeviceId([9u8; 32]);
        cluster.upsert_folder(crate::model::folder::Folder::new(folder.clone(), "f1", "/tmp/f1".into()));

        let fi = FolderInfo::new(folder.clone(), device, 1);
        let fi_id = fi.id;
        cluster.upsert_folder_info(fi).unwrap();

        let file = FileInfo {
            id: FileInfoId::generate(),
            name: "a.txt".into(),
            entry_type: EntryType::File,
            size: 0,
            permissions: 0o644,
            modified_s: 0,
            modified_ns: 0,
            modified_by: device,
            deleted: false,
            invalid: false,
            no_permissions: false,
            symlink_target: None,
            block_size: 0,
            sequence: 1,
            blocks: Vec::new(),
            version: VersionVector::from_entries(vec![crate::model::version_vector::VersionEntry {
                id: ShortDeviceId(1),
                value: 1,
            }]),
        };
        let upsert_file = DiffNode::leaf(DiffKind::UpsertFile { folder: folder.clone(), device, file });
        upsert_file.apply(&mut cluster, &mut actor).unwrap();
        assert_eq!(store.load_folder_infos().unwrap()[0].files().count(), 1);

        let remove = DiffNode::leaf(DiffKind::RemoveFolderInfo(fi_id));
        remove.apply(&mut cluster, &mut actor).unwrap();
        assert!(store.load_folder_infos().unwrap().is_empty());
    }

    #[test]
    fn load_tree_replays_into_an_empty_cluster() {
        let store = temp_store();
        let mut seed_actor = DatabaseActor::new(store.clone());
        let mut seed_cluster = Cluster::new(DeviceId([0u8; 32]), 8);
        let diff = DiffNode::leaf(DiffKind::UpsertDevice(Device::new(DeviceId([9u8; 32]), "seed")));
        diff.apply(&mut seed_cluster, &mut seed_actor).unwrap();

        let actor = DatabaseActor::new(store);
        let tree = actor.load_tree().unwrap().expect("non-empty tree");
        let mut fresh = Cluster::new(DeviceId([0u8; 32]), 8);
        let mut ctl = crate::diff::NullApplyController;
        tree.apply(&mut fresh, &mut ctl).unwrap();

        assert!(fresh.device(&DeviceId([9u8; 32])).is_some());
    }
}

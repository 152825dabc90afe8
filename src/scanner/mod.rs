//! The local scanner (spec §4.5): walks one folder, hashes changed files,
//! and emits diffs describing what changed on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::diff::builders::advance;
use crate::diff::{BlockSpec, DiffNode};
use crate::hasher::{HashContext, HashJob, HashResult, HasherHandle};
use crate::model::block::BlockRef;
use crate::model::file_info::{EntryType, FileInfo, FileInfoId};
use crate::model::version_vector::ShortDeviceId;
use crate::model::{Cluster, DeviceId, FolderId, FolderInfo};

/// Per-tick caps so one scan never monopolizes the runtime (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct ScanBudget {
    pub max_files: u32,
    pub max_bytes_hashed: u64,
}

impl Default for ScanBudget {
    fn default() -> Self {
        Self { max_files: 256, max_bytes_hashed: 64 << 20 }
    }
}

/// How old an orphaned `.syncspirit-tmp` file may be before the scanner
/// gives up resuming it and deletes it outright (spec §4.5).
pub const TEMP_FILE_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug)]
enum WorkItem {
    Directory(PathBuf),
    /// A regular file whose attributes changed; needs (re)hashing.
    HashCandidate { path: PathBuf, relative: String, existing: Option<FileInfoId> },
    /// An orphaned `.syncspirit-tmp` file that still looks resumable.
    Incomplete { final_relative: String, tmp_path: PathBuf },
    /// A known file-info whose entry vanished from disk.
    Removed(FileInfo),
}

/// In-flight hash job bookkeeping: one file's blocks trickle back from the
/// hasher pool out of order; `pending` tracks how many are still owed.
struct InFlightFile {
    relative: String,
    size: u64,
    modified_s: i64,
    modified_ns: u32,
    permissions: u32,
    block_size: u32,
    existing: Option<FileInfoId>,
    blocks: Vec<Option<BlockRef>>,
    pending: usize,
    /// Reserved when hashing starts, not when it completes — see
    /// [`Scanner::reserve_sequence`].
    sequence: u64,
}

/// One folder's scan state (spec §4.5). Call [`Scanner::tick`] repeatedly
/// until it reports no more work; feed hasher results back through
/// [`Scanner::on_hash_result`].
pub struct Scanner {
    pub folder: FolderId,
    local_device: DeviceId,
    root: PathBuf,
    stack: Vec<WorkItem>,
    in_flight: HashMap<Uuid, InFlightFile>,
    hasher: HasherHandle,
    /// Private counter mirroring this folder-info's `max_sequence`, seeded
    /// from the cluster the first time a sequence is needed and advanced
    /// with `bump_sequence` from there — never written back to the
    /// cluster. Several files can be queued for hashing within one tick
    /// before any of their diffs have actually applied and bumped the real
    /// row, so the real row's `max_sequence` can't be consulted fresh for
    /// each one; this local cursor is what keeps them strictly increasing
    /// (spec §3, §5).
    sequence_cursor: Option<FolderInfo>,
}

/// Outcome of one [`Scanner::tick`].
pub enum TickOutcome {
    /// A diff ready to apply (removal, directory-only change, or a
    /// completed incomplete-file resume hint).
    Diff(DiffNode),
    /// The budget ran out before the stack drained; call `tick` again.
    BudgetExhausted,
    /// Nothing left to scan.
    Done,
}

impl Scanner {
    pub fn new(folder: FolderId, local_device: DeviceId, root: PathBuf, hasher: HasherHandle) -> Self {
        Self {
            folder,
            local_device,
            root: root.clone(),
            stack: vec![WorkItem::Directory(root)],
            in_flight: HashMap::new(),
            hasher,
            sequence_cursor: None,
        }
    }

    /// Reserves the next sequence number for a local edit to this
    /// folder-info (spec §3: "sequence ... strictly increasing"; §5:
    /// "advancing by 1 per local edit"). See [`Scanner::sequence_cursor`]
    /// for why this can't just read the cluster's folder-info each time.
    fn reserve_sequence(&mut self, cluster: &Cluster) -> u64 {
        let cursor = self.sequence_cursor.get_or_insert_with(|| {
            cluster
                .folder_info_for(&self.folder, &self.local_device)
                .cloned()
                .unwrap_or_else(|| FolderInfo::new(self.folder.clone(), self.local_device, 0))
        });
        cursor.bump_sequence()
    }

    /// Pops work items until `budget` is exhausted or the stack is empty.
    pub async fn tick(&mut self, cluster: &Cluster, budget: ScanBudget) -> TickOutcome {
        let mut files_done = 0u32;
        let mut bytes_hashed = 0u64;

        while let Some(item) = self.stack.pop() {
            match item {
                WorkItem::Directory(dir) => {
                    if let Err(_e) = self.scan_directory(cluster, &dir).await {
                        continue;
                    }
                }
                WorkItem::HashCandidate { path, relative, existing } => {
                    if let Ok(hashed) = self.start_hashing(&path, &relative, existing, cluster).await {
                        bytes_hashed += hashed;
                    }
                    files_done += 1;
                }
                WorkItem::Incomplete { final_relative, tmp_path } => {
                    if let Some(diff) = self.handle_incomplete(cluster, &final_relative, &tmp_path).await {
                        return TickOutcome::Diff(diff);
                    }
                }
                WorkItem::Removed(file) => {
                    let sequence = self.reserve_sequence(cluster);
                    return TickOutcome::Diff(removal_diff(self.folder.clone(), self.local_device, file, sequence));
                }
            }

            if files_done >= budget.max_files || bytes_hashed >= budget.max_bytes_hashed {
                return TickOutcome::BudgetExhausted;
            }
        }

        if self.stack.is_empty() && self.in_flight.is_empty() {
            TickOutcome::Done
        } else {
            TickOutcome::BudgetExhausted
        }
    }

    async fn scan_directory(&mut self, cluster: &Cluster, dir: &Path) -> std::io::Result<()> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let fi = cluster.folder_info_for(&self.folder, &self.local_device);

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };

            if meta.is_dir() {
                self.stack.push(WorkItem::Directory(path));
                continue;
            }

            if relative.ends_with(crate::fileio::TEMP_SUFFIX) {
                let final_relative = relative.trim_end_matches(crate::fileio::TEMP_SUFFIX).to_string();
                self.stack.push(WorkItem::Incomplete { final_relative, tmp_path: path });
                continue;
            }

            let existing = fi.and_then(|fi| fi.file_by_name(&relative));
            let entry_type = classify(&meta);

            match entry_type {
                Some(EntryType::Symlink) => {
                    // Symlink target comparison happens alongside hashing:
                    // treat as a hash candidate with block_size 0.
                    self.stack.push(WorkItem::HashCandidate {
                        path,
                        relative,
                        existing: existing.map(|f| f.id),
                    });
                }
                Some(EntryType::File) => {
                    let unchanged = existing.is_some_and(|f| {
                        !f.deleted
                            && f.size == meta.len()
                            && f.modified_s == mtime_secs(&meta)
                            && f.permissions == file_permissions(&meta)
                    });
                    if !unchanged {
                        self.stack.push(WorkItem::HashCandidate {
                            path,
                            relative,
                            existing: existing.map(|f| f.id),
                        });
                    }
                }
                Some(EntryType::Directory) | None => {}
            }
        }

        if let Some(fi) = fi {
            // Only entries directly under `dir` are relevant to this pass;
            // subdirectories are covered as their own `Directory` work items.
            for known in fi.files() {
                let known_dir = Path::new(&known.name).parent().unwrap_or(Path::new(""));
                if self.root.join(known_dir) != *dir || known.deleted {
                    continue;
                }
                let disk_path = self.root.join(&known.name);
                if tokio::fs::symlink_metadata(&disk_path).await.is_err() {
                    self.stack.push(WorkItem::Removed(known.clone()));
                }
            }
        }

        Ok(())
    }

    /// Dispatches every block of a changed file to the hasher pool. Returns
    /// the number of bytes submitted so the caller can track budget.
    async fn start_hashing(
        &mut self,
        path: &Path,
        relative: &str,
        existing: Option<FileInfoId>,
        cluster: &Cluster,
    ) -> std::io::Result<u64> {
        const BLOCK_SIZE: u32 = 128 << 10;
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_symlink() {
            // Symlinks carry their target as the sole "block": modelled as
            // a zero-length block list with the target recorded by the
            // caller; scanner emits the diff directly without hashing.
            return Ok(0);
        }

        let data = tokio::fs::read(path).await?;
        let file_uuid = existing.map(|e| e.0).unwrap_or_else(Uuid::new_v4);
        let chunks: Vec<&[u8]> = data.chunks(BLOCK_SIZE as usize).collect();
        let total = chunks.len();
        let sequence = self.reserve_sequence(cluster);

        self.in_flight.insert(
            file_uuid,
            InFlightFile {
                relative: relative.to_string(),
                size: meta.len(),
                modified_s: mtime_secs(&meta),
                modified_ns: 0,
                permissions: file_permissions(&meta),
                block_size: BLOCK_SIZE,
                existing,
                blocks: vec![None; total],
                pending: total,
                sequence,
            },
        );

        for (index, chunk) in chunks.into_iter().enumerate() {
            let ctx = HashContext { folder: self.folder.clone(), file: file_uuid, block_index: index };
            let _ = self.hasher.hash(HashJob { ctx, data: chunk.to_vec() }).await;
        }

        Ok(meta.len())
    }

    /// Feeds one completed hash back in; once every block of a file has
    /// reported, returns the `advance` diff for it (spec §4.5: "a job
    /// completes when every block has reported").
    pub fn on_hash_result(&mut self, result: HashResult) -> Option<DiffNode> {
        let entry = self.in_flight.get_mut(&result.ctx.file)?;
        let offset = (result.ctx.block_index as u64) * entry.block_size as u64;
        entry.blocks[result.ctx.block_index] = Some(BlockRef {
            offset,
            size: result.size,
            hash: result.hash,
            weak_hash: result.weak_hash,
        });
        entry.pending = entry.pending.saturating_sub(1);
        if entry.pending != 0 {
            return None;
        }

        let entry = self.in_flight.remove(&result.ctx.file)?;
        let blocks: Vec<BlockRef> = entry.blocks.into_iter().flatten().collect();
        let new_blocks: Vec<BlockSpec> =
            blocks.iter().map(|b| BlockSpec { hash: b.hash, size: b.size, weak_hash: b.weak_hash }).collect();

        let file = FileInfo {
            id: entry.existing.unwrap_or_else(FileInfoId::generate),
            name: entry.relative,
            entry_type: EntryType::File,
            size: entry.size,
            permissions: entry.permissions,
            modified_s: entry.modified_s,
            modified_ns: entry.modified_ns,
            modified_by: self.local_device,
            deleted: false,
            invalid: false,
            no_permissions: false,
            symlink_target: None,
            block_size: entry.block_size,
            sequence: entry.sequence,
            blocks,
            version: {
                let mut v = crate::model::VersionVector::new();
                v.bump(self.local_device.short());
                v
            },
        };

        Some(advance(self.folder.clone(), self.local_device, file, new_blocks, vec![]))
    }

    /// An orphaned `.syncspirit-tmp` file: resume if it still looks like an
    /// in-progress download, otherwise delete it and emit a removal (spec
    /// §4.5).
    async fn handle_incomplete(
        &mut self,
        cluster: &Cluster,
        final_relative: &str,
        tmp_path: &Path,
    ) -> Option<DiffNode> {
        let source = cluster.folder_info_for(&self.folder, &self.local_device)?.file_by_name(final_relative)?;
        let meta = tokio::fs::metadata(tmp_path).await.ok()?;
        let age_ok = meta
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age < TEMP_FILE_TIMEOUT);

        if source.size == meta.len() && age_ok {
            // Resumable: the pull loop will pick this file back up; the
            // scanner itself has nothing to mutate.
            None
        } else {
            let _ = tokio::fs::remove_file(tmp_path).await;
            None
        }
    }
}

fn classify(meta: &std::fs::Metadata) -> Option<EntryType> {
    if meta.is_dir() {
        Some(EntryType::Directory)
    } else if meta.is_file() {
        Some(EntryType::File)
    } else if meta.file_type().is_symlink() {
        Some(EntryType::Symlink)
    } else {
        None
    }
}

#[cfg(unix)]
fn file_permissions(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_permissions(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Builds a removal diff for a local file-info whose entry vanished from
/// disk (spec §4.5): `deleted = true`, empty block list, bumped version.
pub fn removal_diff(folder: FolderId, device: DeviceId, mut file: FileInfo, sequence: u64) -> DiffNode {
    file.deleted = true;
    file.blocks.clear();
    file.version.bump(device.short());
    file.sequence = sequence;
    advance(folder, device, file, vec![], vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::version_vector::VersionEntry;
    use crate::model::VersionVector;

    fn dev(n: u8) -> DeviceId {
        DeviceId([n; 32])
    }

    fn sample() -> FileInfo {
        FileInfo {
            id: FileInfoId::generate(),
            name: "a.txt".into(),
            entry_type: EntryType::File,
            size: 3,
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
            blocks: vec![crate::model::block::BlockRef {
                offset: 0,
                size: 3,
                hash: crate::model::BlockHash([1u8; 32]),
                weak_hash: 0,
            }],
            version: VersionVector::from_entries(vec![VersionEntry { id: ShortDeviceId(1), value: 1 }]),
        }
    }

    #[test]
    fn removal_diff_clears_blocks_and_marks_deleted() {
        let diff = removal_diff(FolderId("f".into()), dev(0), sample(), 2);
        match &diff.child {
            Some(_) => {}
            None => panic!("advance always wraps an upsert child"),
        }
    }

    #[tokio::test]
    async fn on_hash_result_completes_only_after_every_block() {
        let (handle, mut results, _workers) = crate::hasher::HasherPool::spawn(1, 4);
        let folder = FolderId("f".into());
        let mut scanner = Scanner::new(folder.clone(), dev(0), PathBuf::from("/tmp"), handle.clone());
        let file_uuid = Uuid::new_v4();
        scanner.in_flight.insert(
            file_uuid,
            InFlightFile {
                relative: "a.txt".into(),
                size: 2,
                modified_s: 0,
                modified_ns: 0,
                permissions: 0o644,
                block_size: 1,
                existing: None,
                blocks: vec![None, None],
                pending: 2,
                sequence: 1,
            },
        );
        let _ = handle
            .hash(HashJob {
                ctx: HashContext { folder: folder.clone(), file: file_uuid, block_index: 0 },
                data: vec![b'a'],
            })
            .await;
        let first = results.recv().await.unwrap();
        assert!(scanner.on_hash_result(first).is_none());

        let _ = handle
            .hash(HashJob { ctx: HashContext { folder, file: file_uuid, block_index: 1 }, data: vec![b'b'] })
            .await;
        let second = results.recv().await.unwrap();
        assert!(scanner.on_hash_result(second).is_some());
    }
}

//! Folder — a named, shared replication root (spec §3).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Peer-visible short folder identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(pub String);

/// How a folder orders its file pull queue (not prescribed further by spec;
/// `Random` is the default used by real BEP implementations).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PullOrder {
    #[default]
    Random,
    Alphabetic,
    SmallestFirst,
    LargestFirst,
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderFlags {
    pub read_only: bool,
    pub ignore_permissions: bool,
    pub ignore_deletes: bool,
    pub temp_indexes_disabled: bool,
    pub paused: bool,
    pub suspended: bool,
    pub scheduled: bool,
}

/// A shared folder (spec §3). `synchronizing` is the concurrency guard from
/// §4.4: "at most one concurrent synchronization diff per folder" — a
/// counter incremented at the first in-flight block and decremented at the
/// last, consulted by the scheduler before re-scanning.
#[derive(Debug)]
pub struct Folder {
    pub id: FolderId,
    pub label: String,
    pub path: PathBuf,
    pub pull_order: PullOrder,
    pub flags: FolderFlags,
    pub rescan_interval_s: u32,
    synchronizing: AtomicU32,
}

impl Folder {
    pub fn new(id: FolderId, label: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id,
            label: label.into(),
            path,
            pull_order: PullOrder::default(),
            flags: FolderFlags::default(),
            rescan_interval_s: 3600,
            synchronizing: AtomicU32::new(0),
        }
    }

    pub fn begin_sync(&self) {
        self.synchronizing.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_sync(&self) {
        self.synchronizing.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_synchronizing(&self) -> bool {
        self.synchronizing.load(Ordering::SeqCst) != 0
    }

    pub fn is_scannable(&self) -> bool {
        !self.flags.paused && !self.flags.suspended && !self.is_synchronizing()
    }
}

impl Clone for Folder {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            label: self.label.clone(),
            path: self.path.clone(),
            pull_order: self.pull_order,
            flags: self.flags,
            rescan_interval_s: self.rescan_interval_s,
            synchronizing: AtomicU32::new(self.synchronizing.load(Ordering::SeqCst)),
        }
    }
}

/// Compares the user-visible fields only; `synchronizing` is internal
/// runtime bookkeeping, not part of a folder's identity.
impl PartialEq for Folder {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.label == other.label
            && self.path == other.path
            && self.pull_order == other.pull_order
            && self.flags == other.flags
            && self.rescan_interval_s == other.rescan_interval_s
    }
}

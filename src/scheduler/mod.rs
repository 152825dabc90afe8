//! The scan scheduler (spec §4.6): a FIFO of scan requests plus a single
//! re-armed timer for the nearest rescan deadline across all folders (spec
//! §11 supplemented feature — resolves the original's single-timer
//! re-arm discipline rather than one timer per folder).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::model::{Cluster, FolderId};

/// A request to scan `folder`, optionally scoped to `sub_dir` (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub folder: FolderId,
    pub sub_dir: Option<String>,
}

impl ScanRequest {
    fn covers(&self, other: &ScanRequest) -> bool {
        self.folder == other.folder
            && match (&self.sub_dir, &other.sub_dir) {
                (None, _) => true,
                (Some(a), Some(b)) => b.starts_with(a.as_str()),
                (Some(_), None) => false,
            }
    }
}

struct Deadline {
    folder: FolderId,
    at: Instant,
}

/// Holds the request queue and the per-folder rescan deadlines (spec §4.6).
pub struct Scheduler {
    queue: VecDeque<ScanRequest>,
    deadlines: Vec<Deadline>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), deadlines: Vec::new() }
    }

    /// Enqueues a scan request, merging with or replacing an existing
    /// queued request for the same folder when one subsumes the other
    /// (spec §4.6).
    pub fn request(&mut self, req: ScanRequest) {
        for existing in self.queue.iter() {
            if existing.covers(&req) {
                return;
            }
        }
        self.queue.retain(|existing| !req.covers(existing));
        self.queue.push_back(req);
    }

    /// Arms (or re-arms) the rescan deadline for `folder`.
    pub fn arm(&mut self, folder: FolderId, interval: Duration) {
        self.deadlines.retain(|d| d.folder != folder);
        self.deadlines.push(Deadline { folder, at: Instant::now() + interval });
    }

    pub fn disarm(&mut self, folder: &FolderId) {
        self.deadlines.retain(|d| &d.folder != folder);
    }

    /// Pops the next scan request that a scannable, non-synchronizing
    /// folder can actually run now.
    pub fn next_request(&mut self, cluster: &Cluster) -> Option<ScanRequest> {
        let idx = self.queue.iter().position(|req| {
            cluster.folder(&req.folder).is_some_and(crate::model::Folder::is_scannable)
        })?;
        self.queue.remove(idx)
    }

    /// Promotes any folder whose deadline has elapsed into a full-folder
    /// scan request. Called when the scheduler's timer fires.
    pub fn due_folders(&mut self, now: Instant) -> Vec<FolderId> {
        let (due, pending): (Vec<_>, Vec<_>) = self.deadlines.drain(..).partition(|d| d.at <= now);
        self.deadlines = pending;
        due.into_iter().map(|d| d.folder).collect()
    }

    /// Duration until the next timer fire, or `None` if no folder is armed
    /// (spec §4.6: "arms the timer for the earliest future deadline").
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.deadlines.iter().map(|d| d.at.saturating_duration_since(now)).min()
    }

    pub fn on_scan_finish(&mut self, folder: FolderId, interval: Duration) {
        self.arm(folder, interval);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str) -> FolderId {
        FolderId(name.to_string())
    }

    #[test]
    fn broader_request_replaces_narrower_queued_one() {
        let mut s = Scheduler::new();
        s.request(ScanRequest { folder: folder("f1"), sub_dir: Some("a/b".into()) });
        s.request(ScanRequest { folder: folder("f1"), sub_dir: Some("a".into()) });
        assert_eq!(s.queue.len(), 1);
        assert_eq!(s.queue[0].sub_dir.as_deref(), Some("a"));
    }

    #[test]
    fn narrower_request_is_absorbed_by_existing_broader_one() {
        let mut s = Scheduler::new();
        s.request(ScanRequest { folder: folder("f1"), sub_dir: Some("a".into()) });
        s.request(ScanRequest { folder: folder("f1"), sub_dir: Some("a/b".into()) });
        assert_eq!(s.queue.len(), 1);
        assert_eq!(s.queue[0].sub_dir.as_deref(), Some("a"));
    }

    #[test]
    fn full_folder_request_subsumes_everything() {
        let mut s = Scheduler::new();
        s.request(ScanRequest { folder: folder("f1"), sub_dir: Some("a".into()) });
        s.request(ScanRequest { folder: folder("f1"), sub_dir: None });
        assert_eq!(s.queue.len(), 1);
        assert!(s.queue[0].sub_dir.is_none());
    }

    #[test]
    fn due_folders_only_returns_elapsed_deadlines() {
        let mut s = Scheduler::new();
        let now = Instant::now();
        s.arm(folder("f1"), Duration::from_secs(0));
        s.arm(folder("f2"), Duration::from_secs(3600));
        let due = s.due_folders(now + Duration::from_millis(1));
        assert_eq!(due, vec![folder("f1")]);
        assert!(s.next_deadline(now).is_some());
    }
}

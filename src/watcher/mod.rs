//! The filesystem watcher (spec §2, §4.6): wraps `notify` and coalesces a
//! burst of OS events into folder-change batches the scheduler can merge.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::FolderId;

/// A batch of paths that changed under one folder within one retention
/// window (spec §4.6: the scheduler dedups/merges these into scan requests).
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub folder: FolderId,
    pub paths: Vec<PathBuf>,
}

pub struct FolderWatcher {
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    /// Starts watching `root` for `folder`, coalescing events within
    /// `retention` into one batch before sending.
    pub fn spawn(
        folder: FolderId,
        root: PathBuf,
        retention: Duration,
        batch_tx: mpsc::Sender<ChangeBatch>,
    ) -> Result<(Self, JoinHandle<()>), notify::Error> {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let join = tokio::task::spawn_blocking(move || {
            coalesce_loop(folder, raw_rx, retention, batch_tx);
        });

        Ok((Self { _watcher: watcher }, join))
    }
}

fn coalesce_loop(
    folder: FolderId,
    raw_rx: std::sync::mpsc::Receiver<notify::Result<Event>>,
    retention: Duration,
    batch_tx: mpsc::Sender<ChangeBatch>,
) {
    let mut pending: HashSet<PathBuf> = HashSet::new();
    loop {
        match raw_rx.recv_timeout(retention) {
            Ok(Ok(event)) => {
                for path in relevant_paths(&event) {
                    pending.insert(path);
                }
            }
            Ok(Err(_)) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if !pending.is_empty() {
                    let paths: Vec<PathBuf> = pending.drain().collect();
                    if batch_tx.blocking_send(ChangeBatch { folder: folder.clone(), paths }).is_err() {
                        return;
                    }
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn relevant_paths(event: &Event) -> impl Iterator<Item = PathBuf> + '_ {
    let interesting = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    event.paths.iter().filter(move |_| interesting).cloned()
}

/// True if `path`'s final component carries the scanner's temp-file
/// suffix (spec §4.5).
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(crate::fileio::TEMP_SUFFIX))
}

//! In-flight BEP block requests, keyed by request id (spec §4.4, §5:
//! "pool-allocated per connection").

use std::collections::HashMap;

use crate::model::block::BlockHash;
use crate::model::file_info::FileInfoId;
use crate::model::folder::FolderId;

/// One outstanding `Request` this controller has sent to its peer.
#[derive(Debug, Clone)]
pub struct PendingBlock {
    pub folder: FolderId,
    pub file: FileInfoId,
    pub file_name: String,
    pub offset: u64,
    pub expected_hash: BlockHash,
}

/// Allocates request ids and tracks which block each is waiting on. Ids are
/// reused once their slot is released.
#[derive(Default)]
pub struct RequestRing {
    next_id: i32,
    free_ids: Vec<i32>,
    in_flight: HashMap<i32, PendingBlock>,
}

impl RequestRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, pending: PendingBlock) -> i32 {
        let id = self.free_ids.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        self.in_flight.insert(id, pending);
        id
    }

    /// Releases `id`'s slot, returning its pending block if one was there.
    /// Every path (success, mismatch, shutdown) calls this exactly once
    /// per acquired id (spec §4.4 invariant).
    pub fn release(&mut self, id: i32) -> Option<PendingBlock> {
        let entry = self.in_flight.remove(&id);
        if entry.is_some() {
            self.free_ids.push(id);
        }
        entry
    }

    pub fn get(&self, id: i32) -> Option<&PendingBlock> {
        self.in_flight.get(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Releases every slot, returning the pending blocks so the caller can
    /// fail them with a cancellation error (spec §4.4 shutdown semantics).
    pub fn drain(&mut self) -> Vec<PendingBlock> {
        let drained: Vec<_> = self.in_flight.drain().map(|(_, v)| v).collect();
        self.free_ids.clear();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(n: u8) -> PendingBlock {
        PendingBlock {
            folder: FolderId("f1".into()),
            file: FileInfoId::generate(),
            file_name: "a.bin".into(),
            offset: 0,
            expected_hash: BlockHash([n; 32]),
        }
    }

    #[test]
    fn released_id_is_reused() {
        let mut ring = RequestRing::new();
        let id = ring.acquire(block(1));
        ring.release(id);
        let id2 = ring.acquire(block(2));
        assert_eq!(id, id2);
    }

    #[test]
    fn drain_empties_every_slot() {
        let mut ring = RequestRing::new();
        ring.acquire(block(1));
        ring.acquire(block(2));
        let drained = ring.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(ring.in_flight_count(), 0);
    }

    #[test]
    fn unknown_id_lookup_returns_none() {
        let ring = RequestRing::new();
        assert!(ring.get(42).is_none());
    }
}

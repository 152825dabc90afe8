//! Version vectors and the advance-action resolver (spec §3).

use std::cmp::Ordering;

/// Short device id used inside version vectors — the XOR-fold of a
/// [`crate::model::device::DeviceId`]'s 32-byte sha256 down to 8 bytes, the
/// same scheme Syncthing's wire format uses for its short ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortDeviceId(pub u64);

impl ShortDeviceId {
    pub fn fold(full: &[u8; 32]) -> Self {
        let mut acc = [0u8; 8];
        for (i, byte) in full.iter().enumerate() {
            acc[i % 8] ^= byte;
        }
        Self(u64::from_be_bytes(acc))
    }
}

/// One (device, counter) pair inside a [`VersionVector`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub id: ShortDeviceId,
    pub value: u64,
}

/// Ordered list of (short device id, counter) pairs (spec §3).
///
/// Kept sorted by `id` so that `leq` can run in a single merge pass instead
/// of a lookup per entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionVector {
    entries: Vec<VersionEntry>,
}

/// Result of comparing two version vectors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Relation {
    Equal,
    /// `self` is dominated by `other` (`self <= other`, strictly less on at
    /// least one entry).
    Less,
    /// `self` dominates `other`.
    Greater,
    /// Neither dominates the other — a conflict.
    Concurrent,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(mut entries: Vec<VersionEntry>) -> Self {
        entries.sort_by_key(|e| e.id);
        Self { entries }
    }

    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ShortDeviceId) -> Option<u64> {
        self.entries.binary_search_by_key(&id, |e| e.id).ok().map(|idx| self.entries[idx].value)
    }

    /// Records an edit by `id`: bumps its counter by one, or inserts it at 1
    /// if absent.
    pub fn bump(&mut self, id: ShortDeviceId) {
        match self.entries.binary_search_by_key(&id, |e| e.id) {
            Ok(idx) => self.entries[idx].value += 1,
            Err(idx) => self.entries.insert(idx, VersionEntry { id, value: 1 }),
        }
    }

    /// `self <= other`: every entry in `self` has a counterpart in `other`
    /// with an equal or greater counter, and absent entries count as 0.
    fn leq(&self, other: &Self) -> bool {
        self.entries.iter().all(|e| other.get(e.id).unwrap_or(0) >= e.value)
    }

    pub fn compare(&self, other: &Self) -> Relation {
        let self_leq_other = self.leq(other);
        let other_leq_self = other.leq(self);
        match (self_leq_other, other_leq_self) {
            (true, true) => Relation::Equal,
            (true, false) => Relation::Less,
            (false, true) => Relation::Greater,
            (false, false) => Relation::Concurrent,
        }
    }
}

impl PartialOrd for VersionVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            Relation::Equal => Some(Ordering::Equal),
            Relation::Less => Some(Ordering::Less),
            Relation::Greater => Some(Ordering::Greater),
            Relation::Concurrent => None,
        }
    }
}

/// The resolver's decision for one (peer file, local file) pair (spec §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdvanceAction {
    Ignore,
    RemoteCopy,
    ResolveRemoteWin,
    LocalUpdate,
}

/// Decides what to do with a peer-advertised file given the locally known
/// version vector for the same (folder, name), if any.
///
/// `local_update` is never returned here: it is produced directly by the
/// scanner when it detects a disk-side change, not by comparing two
/// version vectors.
pub fn resolve_peer_file(local: Option<&VersionVector>, peer: &VersionVector) -> AdvanceAction {
    match local {
        None => AdvanceAction::RemoteCopy,
        Some(local) => match peer.compare(local) {
            Relation::Equal | Relation::Less => AdvanceAction::Ignore,
            Relation::Greater => AdvanceAction::RemoteCopy,
            Relation::Concurrent => AdvanceAction::ResolveRemoteWin,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(pairs: &[(u64, u64)]) -> VersionVector {
        VersionVector::from_entries(
            pairs.iter().map(|&(id, value)| VersionEntry { id: ShortDeviceId(id), value }).collect(),
        )
    }

    #[test]
    fn equal_vectors() {
        let a = vv(&[(1, 3), (2, 5)]);
        let b = vv(&[(2, 5), (1, 3)]);
        assert_eq!(a.compare(&b), Relation::Equal);
    }

    #[test]
    fn strictly_less() {
        let a = vv(&[(1, 2)]);
        let b = vv(&[(1, 3)]);
        assert_eq!(a.compare(&b), Relation::Less);
        assert_eq!(b.compare(&a), Relation::Greater);
    }

    #[test]
    fn concurrent_when_disjoint_progress() {
        let a = vv(&[(1, 2), (2, 1)]);
        let b = vv(&[(1, 2), (2, 2), (3, 1)]);
        // a is missing device 3 entirely relative to b... but b dominates a here.
        assert_eq!(a.compare(&b), Relation::Less);

        let c = vv(&[(1, 3), (2, 1)]);
        let d = vv(&[(1, 2), (2, 2)]);
        assert_eq!(c.compare(&d), Relation::Concurrent);
    }

    #[test]
    fn bump_inserts_or_increments() {
        let mut v = VersionVector::new();
        v.bump(ShortDeviceId(7));
        assert_eq!(v.get(ShortDeviceId(7)), Some(1));
        v.bump(ShortDeviceId(7));
        assert_eq!(v.get(ShortDeviceId(7)), Some(2));
    }

    #[test]
    fn resolver_matches_spec_actions() {
        let local = vv(&[(1, 1)]);
        let older_peer = vv(&[(1, 1)]);
        assert_eq!(resolve_peer_file(Some(&local), &older_peer), AdvanceAction::Ignore);

        let newer_peer = vv(&[(1, 2)]);
        assert_eq!(resolve_peer_file(Some(&local), &newer_peer), AdvanceAction::RemoteCopy);

        let concurrent_peer = vv(&[(2, 1)]);
        assert_eq!(
            resolve_peer_file(Some(&local), &concurrent_peer),
            AdvanceAction::ResolveRemoteWin
        );

        assert_eq!(resolve_peer_file(None, &newer_peer), AdvanceAction::RemoteCopy);
    }

    #[test]
    fn short_device_id_fold_is_deterministic() {
        let full = [7u8; 32];
        assert_eq!(ShortDeviceId::fold(&full), ShortDeviceId::fold(&full));
    }
}

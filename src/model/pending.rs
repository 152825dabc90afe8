//! Lightweight rows queuing user decisions (spec §3).

use crate::model::device::{ContactUri, DeviceId};
use crate::model::folder::FolderId;

/// A device seen connecting or announcing without a full [`super::device::Device`]
/// row yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDevice {
    pub id: DeviceId,
    pub last_seen: ContactUri,
    pub name: String,
}

/// A device explicitly rejected by the operator; kept so a repeated
/// announce doesn't re-surface the same prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredDevice {
    pub id: DeviceId,
    pub last_seen: ContactUri,
    pub name: String,
}

/// A folder a peer advertises that we are not (yet) sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFolder {
    pub folder: FolderId,
    pub label: String,
    pub offered_by: DeviceId,
    pub index_id: u64,
    pub max_sequence: u64,
}

/// A folder explicitly rejected by the operator (spec §6.3 `ignored_folder`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredFolder {
    pub folder: FolderId,
    pub label: String,
}

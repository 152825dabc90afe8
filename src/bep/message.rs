//! Wire-shaped message types (spec §6.1). These mirror the model types but
//! are flat and `Clone`-cheap, matching exactly the fields the protocol
//! preserves.

/// `{id, value}` entry of a wire-format version vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireVersionEntry {
    pub id: u64,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireBlock {
    pub offset: u64,
    pub size: u32,
    pub hash: [u8; 32],
    pub weak_hash: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEntryType {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireFileInfo {
    pub name: String,
    pub entry_type: WireEntryType,
    pub size: u64,
    pub permissions: u32,
    pub modified_s: i64,
    pub modified_ns: u32,
    pub modified_by: [u8; 32],
    pub deleted: bool,
    pub invalid: bool,
    pub no_permissions: bool,
    pub version: Vec<WireVersionEntry>,
    pub sequence: u64,
    pub block_size: u32,
    pub blocks: Vec<WireBlock>,
    pub symlink_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfigFolderDevice {
    pub id: [u8; 32],
    pub name: String,
    pub addresses: Vec<String>,
    pub compression: u8,
    pub cert_name: String,
    pub max_sequence: u64,
    pub introducer: bool,
    pub index_id: u64,
    pub skip_introduction_removals: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfigFolder {
    pub id: String,
    pub label: String,
    pub devices: Vec<ClusterConfigFolderDevice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    NoError,
    Generic,
    NoSuchFile,
    InvalidFile,
}

/// Every frame payload the protocol exchanges (spec §6.1).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello { device_name: String, client_name: String, client_version: String },
    ClusterConfig { folders: Vec<ClusterConfigFolder> },
    Index { folder: String, files: Vec<WireFileInfo> },
    IndexUpdate { folder: String, files: Vec<WireFileInfo> },
    Request {
        id: i32,
        folder: String,
        name: String,
        offset: u64,
        size: u32,
        hash: [u8; 32],
        from_temporary: bool,
        weak_hash: u32,
    },
    Response { id: i32, data: Vec<u8>, code: ResponseCode },
    DownloadProgress { folder: String },
    Ping,
    Close { reason: String },
}

impl Message {
    /// The one-byte tag carried in the frame header so the reader knows
    /// which parser to invoke before the body is fully buffered.
    pub fn tag(&self) -> u8 {
        match self {
            Message::Hello { .. } => 0,
            Message::ClusterConfig { .. } => 1,
            Message::Index { .. } => 2,
            Message::IndexUpdate { .. } => 3,
            Message::Request { .. } => 4,
            Message::Response { .. } => 5,
            Message::DownloadProgress { .. } => 6,
            Message::Ping => 7,
            Message::Close { .. } => 8,
        }
    }
}

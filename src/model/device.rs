//! Device identity and the connection-state lattice (spec §3, §9).

use std::cmp::Ordering;

use crate::model::version_vector::ShortDeviceId;

/// 32-byte sha256 of a device certificate's public key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub [u8; 32]);

impl DeviceId {
    pub fn short(&self) -> ShortDeviceId {
        ShortDeviceId::fold(&self.0)
    }
}

/// Peer-preferred compression mode (spec §6.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Compression {
    Never,
    #[default]
    Metadata,
    Always,
}

/// A contact URI a device may be reached at (`tcp://host:port`,
/// `relay://host:port`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactUri(pub String);

impl ContactUri {
    fn scheme(&self) -> &str {
        self.0.split("://").next().unwrap_or("")
    }

    fn port(&self) -> u16 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, p)| p.trim_end_matches(['/']).parse().ok())
            .unwrap_or(0)
    }

    fn is_relay(&self) -> bool {
        self.scheme().starts_with("relay")
    }

    fn is_tcp(&self) -> bool {
        self.scheme().starts_with("tcp")
    }
}

/// Runtime connection state of a device, ordered per spec §9's resolved
/// Open Question: among two `Online` states, tcp is preferred over relay,
/// then ascending port. Grounded on `device_state_t` in
/// `examples/original_source/src/model/device_state.cpp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    Unknown,
    Discovering,
    Connecting,
    Connected,
    Online(ContactUri),
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Offline => 0,
            ConnectionState::Unknown => 1,
            ConnectionState::Discovering => 2,
            ConnectionState::Connecting => 3,
            ConnectionState::Connected => 4,
            ConnectionState::Online(_) => 5,
        }
    }
}

impl PartialOrd for ConnectionState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if let (ConnectionState::Online(a), ConnectionState::Online(b)) = (self, other) {
            if a == b {
                return Some(Ordering::Equal);
            }
            return Some(match (a.is_relay(), b.is_tcp(), a.is_tcp(), b.is_relay()) {
                (true, true, _, _) => Ordering::Less,
                (_, _, true, true) => Ordering::Greater,
                _ => a.port().cmp(&b.port()),
            });
        }
        Some(self.rank().cmp(&other.rank()))
    }
}

/// Versioned device runtime state. The `token` increases every time a
/// device is re-observed going offline, so that two `Online` observations
/// taken at different connection epochs can still be told apart for
/// rollback purposes even if their URIs happen to coincide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    token: u32,
    pub connection: ConnectionState,
}

impl DeviceState {
    pub fn offline(token: u32) -> Self {
        Self { token, connection: ConnectionState::Offline }
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn with_connection(&self, connection: ConnectionState) -> Self {
        Self { token: self.token, connection }
    }

    pub fn next_epoch(&self) -> Self {
        Self { token: self.token + 1, connection: ConnectionState::Offline }
    }

    /// True iff `other` is a strictly older state in the same epoch as
    /// `self`, i.e. rolling `self` back down to `other` would be sound.
    pub fn can_rollback_to(&self, other: &Self) -> bool {
        self.token == other.token && matches!(other.partial_cmp(self), Some(Ordering::Less))
    }
}

impl PartialOrd for DeviceState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.token != other.token {
            return None;
        }
        self.connection.partial_cmp(&other.connection)
    }
}

/// Identity and attributes of a device known to this cluster (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub addresses: Vec<ContactUri>,
    pub compression: Compression,
    pub introducer: bool,
    pub state: DeviceState,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            addresses: Vec::new(),
            compression: Compression::default(),
            introducer: false,
            state: DeviceState::offline(0),
        }
    }
}

//! Ambient node configuration (spec §10.3): just enough to construct a
//! [`crate::model::Cluster`] and start the acceptor, discovery beacon, and
//! initially-known peers/folders. Not a settings system — certificate
//! issuance, discovery-server configuration, and UI preferences live
//! outside this crate's scope (spec §1).

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::model::device::DeviceId;
use crate::model::folder::FolderId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("device id in config must be 64 hex characters, got {0} characters")]
    BadDeviceIdLength(usize),
    #[error("invalid hex in device id: {0}")]
    BadDeviceIdHex(String),
}

/// One folder to share at startup and the devices it is shared with.
#[derive(Debug, Clone, Deserialize)]
pub struct FolderConfig {
    pub id: String,
    pub label: String,
    pub path: PathBuf,
    #[serde(default)]
    pub devices: Vec<String>,
}

/// One device known at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("syncspirit.redb")
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    device_id: String,
    listen_addr: SocketAddr,
    #[serde(default = "default_db_path")]
    db_path: PathBuf,
    #[serde(default)]
    devices: Vec<DeviceConfig>,
    #[serde(default)]
    folders: Vec<FolderConfig>,
}

/// A node's local identity plus the peers/folders it starts out knowing
/// about. Parsed from TOML; device ids are 64-character hex strings in the
/// file, decoded to [`DeviceId`] here.
#[derive(Debug, Clone)]
pub struct Config {
    pub local_device: DeviceId,
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    pub devices: Vec<DeviceConfig>,
    pub folders: Vec<FolderConfig>,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        let local_device = parse_device_id(&raw.device_id)?;
        Ok(Self {
            local_device,
            listen_addr: raw.listen_addr,
            db_path: raw.db_path,
            devices: raw.devices,
            folders: raw.folders,
        })
    }

    /// Folder ids this config wants shared, as typed [`FolderId`]s.
    pub fn folder_ids(&self) -> Vec<FolderId> {
        self.folders.iter().map(|f| FolderId(f.id.clone())).collect()
    }
}

pub fn parse_device_id(hex: &str) -> Result<DeviceId, ConfigError> {
    if hex.len() != 64 {
        return Err(ConfigError::BadDeviceIdLength(hex.len()));
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).unwrap_or("");
        bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| ConfigError::BadDeviceIdHex(pair.to_string()))?;
    }
    Ok(DeviceId(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
device_id = "0000000000000000000000000000000000000000000000000000000000000000"
listen_addr = "0.0.0.0:22000"

[[devices]]
id = "1111111111111111111111111111111111111111111111111111111111111111"
name = "laptop"
addresses = ["tcp://10.0.0.2:22000"]

[[folders]]
id = "docs"
label = "Documents"
path = "/home/user/docs"
devices = ["1111111111111111111111111111111111111111111111111111111111111111"]
"#;

    #[test]
    fn parses_a_minimal_config() {
        let cfg = Config::parse(SAMPLE, std::path::Path::new("test.toml")).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:22000".parse().unwrap());
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.folders.len(), 1);
        assert_eq!(cfg.folder_ids(), vec![FolderId("docs".into())]);
    }

    #[test]
    fn rejects_wrong_length_device_id() {
        assert!(matches!(parse_device_id("abcd"), Err(ConfigError::BadDeviceIdLength(4))));
    }

    #[test]
    fn rejects_non_hex_device_id() {
        let bad = "zz".repeat(32);
        assert!(matches!(parse_device_id(&bad), Err(ConfigError::BadDeviceIdHex(_))));
    }
}

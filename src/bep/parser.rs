//! Wire-format parsing for BEP messages. Mirrors the teacher's
//! `parser::primitive` style: one function per primitive, reading from an
//! `impl Read`, big-endian throughout.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use super::message::{
    ClusterConfigFolder, ClusterConfigFolderDevice, Message, ResponseCode, WireBlock, WireEntryType,
    WireFileInfo, WireVersionEntry,
};
use super::BepError;

pub fn u8(src: &mut impl Read) -> Result<u8, BepError> {
    src.read_u8().map_err(Into::into)
}

pub fn u32(src: &mut impl Read) -> Result<u32, BepError> {
    src.read_u32::<BigEndian>().map_err(Into::into)
}

pub fn i32(src: &mut impl Read) -> Result<i32, BepError> {
    src.read_i32::<BigEndian>().map_err(Into::into)
}

pub fn u64(src: &mut impl Read) -> Result<u64, BepError> {
    src.read_u64::<BigEndian>().map_err(Into::into)
}

pub fn i64(src: &mut impl Read) -> Result<i64, BepError> {
    src.read_i64::<BigEndian>().map_err(Into::into)
}

pub fn bool(src: &mut impl Read) -> Result<bool, BepError> {
    Ok(u8(src)? != 0)
}

pub fn array32(src: &mut impl Read) -> Result<[u8; 32], BepError> {
    let mut buf = [0u8; 32];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn bytes(src: &mut impl Read) -> Result<Vec<u8>, BepError> {
    let len = u32(src)? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn string(src: &mut impl Read) -> Result<String, BepError> {
    let raw = bytes(src)?;
    String::from_utf8(raw).map_err(|e| BepError::Malformed(e.to_string()))
}

pub fn option<T>(
    src: &mut impl Read,
    cont: impl FnOnce(&mut dyn Read) -> Result<T, BepError>,
) -> Result<Option<T>, BepError> {
    if bool(src)? {
        Ok(Some(cont(src)?))
    } else {
        Ok(None)
    }
}

fn vec_of<T>(
    src: &mut impl Read,
    cont: impl Fn(&mut dyn Read) -> Result<T, BepError>,
) -> Result<Vec<T>, BepError> {
    let count = u32(src)? as usize;
    (0..count).map(|_| cont(src)).collect()
}

fn version_entry(src: &mut dyn Read) -> Result<WireVersionEntry, BepError> {
    Ok(WireVersionEntry { id: u64(src)?, value: u64(src)? })
}

fn block(src: &mut dyn Read) -> Result<WireBlock, BepError> {
    Ok(WireBlock { offset: u64(src)?, size: u32(src)?, hash: array32(src)?, weak_hash: u32(src)? })
}

fn entry_type(src: &mut impl Read) -> Result<WireEntryType, BepError> {
    match u8(src)? {
        0 => Ok(WireEntryType::File),
        1 => Ok(WireEntryType::Directory),
        2 => Ok(WireEntryType::Symlink),
        other => Err(BepError::Malformed(format!("unknown entry type {other}"))),
    }
}

fn file_info(src: &mut dyn Read) -> Result<WireFileInfo, BepError> {
    Ok(WireFileInfo {
        name: string(src)?,
        entry_type: entry_type(src)?,
        size: u64(src)?,
        permissions: u32(src)?,
        modified_s: i64(src)?,
        modified_ns: u32(src)?,
        modified_by: array32(src)?,
        deleted: bool(src)?,
        invalid: bool(src)?,
        no_permissions: bool(src)?,
        version: vec_of(src, version_entry)?,
        sequence: u64(src)?,
        block_size: u32(src)?,
        blocks: vec_of(src, block)?,
        symlink_target: option(src, |s| string(s))?,
    })
}

fn cluster_config_device(src: &mut dyn Read) -> Result<ClusterConfigFolderDevice, BepError> {
    Ok(ClusterConfigFolderDevice {
        id: array32(src)?,
        name: string(src)?,
        addresses: vec_of(src, |s| string(s))?,
        compression: u8(src)?,
        cert_name: string(src)?,
        max_sequence: u64(src)?,
        introducer: bool(src)?,
        index_id: u64(src)?,
        skip_introduction_removals: bool(src)?,
    })
}

fn cluster_config_folder(src: &mut dyn Read) -> Result<ClusterConfigFolder, BepError> {
    Ok(ClusterConfigFolder {
        id: string(src)?,
        label: string(src)?,
        devices: vec_of(src, cluster_config_device)?,
    })
}

fn response_code(src: &mut impl Read) -> Result<ResponseCode, BepError> {
    match u8(src)? {
        0 => Ok(ResponseCode::NoError),
        1 => Ok(ResponseCode::Generic),
        2 => Ok(ResponseCode::NoSuchFile),
        3 => Ok(ResponseCode::InvalidFile),
        other => Err(BepError::Malformed(format!("unknown response code {other}"))),
    }
}

/// Parses the body bytes for the message type carried in the frame header.
pub fn message(tag: u8, body: &[u8]) -> Result<Message, BepError> {
    let mut src = body;
    match tag {
        0 => Ok(Message::Hello {
            device_name: string(&mut src)?,
            client_name: string(&mut src)?,
            client_version: string(&mut src)?,
        }),
        1 => Ok(Message::ClusterConfig { folders: vec_of(&mut src, cluster_config_folder)? }),
        2 => Ok(Message::Index { folder: string(&mut src)?, files: vec_of(&mut src, file_info)? }),
        3 => Ok(Message::IndexUpdate { folder: string(&mut src)?, files: vec_of(&mut src, file_info)? }),
        4 => Ok(Message::Request {
            id: i32(&mut src)?,
            folder: string(&mut src)?,
            name: string(&mut src)?,
            offset: u64(&mut src)?,
            size: u32(&mut src)?,
            hash: array32(&mut src)?,
            from_temporary: bool(&mut src)?,
            weak_hash: u32(&mut src)?,
        }),
        5 => Ok(Message::Response { id: i32(&mut src)?, data: bytes(&mut src)?, code: response_code(&mut src)? }),
        6 => Ok(Message::DownloadProgress { folder: string(&mut src)? }),
        7 => Ok(Message::Ping),
        8 => Ok(Message::Close { reason: string(&mut src)? }),
        other => Err(BepError::UnknownMessageType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping_with_empty_body() {
        assert_eq!(message(7, &[]).unwrap(), Message::Ping);
    }

    #[test]
    fn parses_close_reason() {
        let body = [0, 0, 0, 4, b'b', b'y', b'e', b'!'];
        assert_eq!(message(8, &body).unwrap(), Message::Close { reason: "bye!".into() });
    }

    #[test]
    fn rejects_unknown_tag() {
        assert_eq!(message(99, &[]), Err(BepError::UnknownMessageType(99)));
    }

    #[test]
    fn parses_hello() {
        let mut body = Vec::new();
        body.extend_from_slice(&4u32.to_be_bytes());
        body.extend_from_slice(b"node");
        body.extend_from_slice(&3u32.to_be_bytes());
        body.extend_from_slice(b"syn");
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(b"1");
        let parsed = message(0, &body).unwrap();
        assert_eq!(
            parsed,
            Message::Hello { device_name: "node".into(), client_name: "syn".into(), client_version: "1".into() }
        );
    }
}

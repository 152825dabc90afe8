//! Wire-format serialization for BEP messages — the write-side mirror of
//! [`super::parser`].

use byteorder::{BigEndian, WriteBytesExt};

use super::message::{
    ClusterConfigFolder, ClusterConfigFolderDevice, Message, ResponseCode, WireBlock, WireEntryType,
    WireFileInfo, WireVersionEntry,
};
use super::BepError;

pub fn u8(dest: &mut Vec<u8>, n: u8) {
    dest.push(n);
}

pub fn u32(dest: &mut Vec<u8>, n: u32) {
    dest.write_u32::<BigEndian>(n).expect("Vec<u8> writes never fail");
}

pub fn i32(dest: &mut Vec<u8>, n: i32) {
    dest.write_i32::<BigEndian>(n).expect("Vec<u8> writes never fail");
}

pub fn u64(dest: &mut Vec<u8>, n: u64) {
    dest.write_u64::<BigEndian>(n).expect("Vec<u8> writes never fail");
}

pub fn i64(dest: &mut Vec<u8>, n: i64) {
    dest.write_i64::<BigEndian>(n).expect("Vec<u8> writes never fail");
}

pub fn bool(dest: &mut Vec<u8>, b: bool) {
    u8(dest, if b { 1 } else { 0 });
}

pub fn array32(dest: &mut Vec<u8>, bytes: &[u8; 32]) {
    dest.extend_from_slice(bytes);
}

pub fn bytes(dest: &mut Vec<u8>, data: &[u8]) {
    u32(dest, data.len() as u32);
    dest.extend_from_slice(data);
}

pub fn string(dest: &mut Vec<u8>, s: &str) {
    bytes(dest, s.as_bytes());
}

pub fn option<T>(dest: &mut Vec<u8>, opt: &Option<T>, cont: impl FnOnce(&mut Vec<u8>, &T)) {
    match opt {
        Some(v) => {
            bool(dest, true);
            cont(dest, v);
        }
        None => bool(dest, false),
    }
}

fn vec_of<T>(dest: &mut Vec<u8>, items: &[T], cont: impl Fn(&mut Vec<u8>, &T)) {
    u32(dest, items.len() as u32);
    for item in items {
        cont(dest, item);
    }
}

fn version_entry(dest: &mut Vec<u8>, e: &WireVersionEntry) {
    u64(dest, e.id);
    u64(dest, e.value);
}

fn block(dest: &mut Vec<u8>, b: &WireBlock) {
    u64(dest, b.offset);
    u32(dest, b.size);
    array32(dest, &b.hash);
    u32(dest, b.weak_hash);
}

fn entry_type(dest: &mut Vec<u8>, t: WireEntryType) {
    u8(
        dest,
        match t {
            WireEntryType::File => 0,
            WireEntryType::Directory => 1,
            WireEntryType::Symlink => 2,
        },
    );
}

fn file_info(dest: &mut Vec<u8>, f: &WireFileInfo) {
    string(dest, &f.name);
    entry_type(dest, f.entry_type);
    u64(dest, f.size);
    u32(dest, f.permissions);
    i64(dest, f.modified_s);
    u32(dest, f.modified_ns);
    array32(dest, &f.modified_by);
    bool(dest, f.deleted);
    bool(dest, f.invalid);
    bool(dest, f.no_permissions);
    vec_of(dest, &f.version, version_entry);
    u64(dest, f.sequence);
    u32(dest, f.block_size);
    vec_of(dest, &f.blocks, block);
    option(dest, &f.symlink_target, |d, s| string(d, s));
}

fn cluster_config_device(dest: &mut Vec<u8>, d: &ClusterConfigFolderDevice) {
    array32(dest, &d.id);
    string(dest, &d.name);
    vec_of(dest, &d.addresses, |d, s| string(d, s));
    u8(dest, d.compression);
    string(dest, &d.cert_name);
    u64(dest, d.max_sequence);
    bool(dest, d.introducer);
    u64(dest, d.index_id);
    bool(dest, d.skip_introduction_removals);
}

fn cluster_config_folder(dest: &mut Vec<u8>, f: &ClusterConfigFolder) {
    string(dest, &f.id);
    string(dest, &f.label);
    vec_of(dest, &f.devices, cluster_config_device);
}

fn response_code(dest: &mut Vec<u8>, c: ResponseCode) {
    u8(
        dest,
        match c {
            ResponseCode::NoError => 0,
            ResponseCode::Generic => 1,
            ResponseCode::NoSuchFile => 2,
            ResponseCode::InvalidFile => 3,
        },
    );
}

/// Serializes `msg`'s body (the frame header's tag comes from
/// [`Message::tag`] separately).
pub fn message(msg: &Message) -> Result<Vec<u8>, BepError> {
    let mut body = Vec::new();
    match msg {
        Message::Hello { device_name, client_name, client_version } => {
            string(&mut body, device_name);
            string(&mut body, client_name);
            string(&mut body, client_version);
        }
        Message::ClusterConfig { folders } => vec_of(&mut body, folders, cluster_config_folder),
        Message::Index { folder, files } => {
            string(&mut body, folder);
            vec_of(&mut body, files, file_info);
        }
        Message::IndexUpdate { folder, files } => {
            string(&mut body, folder);
            vec_of(&mut body, files, file_info);
        }
        Message::Request { id, folder, name, offset, size, hash, from_temporary, weak_hash } => {
            i32(&mut body, *id);
            string(&mut body, folder);
            string(&mut body, name);
            u64(&mut body, *offset);
            u32(&mut body, *size);
            array32(&mut body, hash);
            bool(&mut body, *from_temporary);
            u32(&mut body, *weak_hash);
        }
        Message::Response { id, data, code } => {
            i32(&mut body, *id);
            bytes(&mut body, data);
            response_code(&mut body, *code);
        }
        Message::DownloadProgress { folder } => string(&mut body, folder),
        Message::Ping => {}
        Message::Close { reason } => string(&mut body, reason),
    }
    Ok(body)
}

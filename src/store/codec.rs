//! Row encode/decode helpers for the persistent store (spec §6.3). Same
//! big-endian, length-prefixed style as [`crate::bep::parser`] /
//! [`crate::bep::serializer`], kept separate because store rows and wire
//! messages evolve independently.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::model::block::{BlockHash, BlockInfo};
use crate::model::device::{Compression, ContactUri, Device};
use crate::model::file_info::{EntryType, FileInfo, FileInfoId};
use crate::model::folder::{Folder, FolderFlags, PullOrder};
use crate::model::folder_info::{FolderInfo, FolderInfoId};
use crate::model::pending::{IgnoredDevice, IgnoredFolder, PendingDevice, PendingFolder};
use crate::model::version_vector::{ShortDeviceId, VersionEntry, VersionVector};
use crate::model::{DeviceId, FolderId};
use crate::store::StoreError;

fn w_u8(dest: &mut Vec<u8>, v: u8) {
    dest.push(v);
}
fn w_u32(dest: &mut Vec<u8>, v: u32) {
    dest.write_u32::<BigEndian>(v).unwrap();
}
fn w_u64(dest: &mut Vec<u8>, v: u64) {
    dest.write_u64::<BigEndian>(v).unwrap();
}
fn w_i64(dest: &mut Vec<u8>, v: i64) {
    dest.write_i64::<BigEndian>(v).unwrap();
}
fn w_bool(dest: &mut Vec<u8>, v: bool) {
    w_u8(dest, v as u8);
}
fn w_bytes(dest: &mut Vec<u8>, v: &[u8]) {
    w_u32(dest, v.len() as u32);
    dest.extend_from_slice(v);
}
fn w_string(dest: &mut Vec<u8>, v: &str) {
    w_bytes(dest, v.as_bytes());
}

fn r_u8(src: &mut impl Read) -> Result<u8, StoreError> {
    src.read_u8().map_err(|e| StoreError::Codec(e.to_string()))
}
fn r_u32(src: &mut impl Read) -> Result<u32, StoreError> {
    src.read_u32::<BigEndian>().map_err(|e| StoreError::Codec(e.to_string()))
}
fn r_u64(src: &mut impl Read) -> Result<u64, StoreError> {
    src.read_u64::<BigEndian>().map_err(|e| StoreError::Codec(e.to_string()))
}
fn r_i64(src: &mut impl Read) -> Result<i64, StoreError> {
    src.read_i64::<BigEndian>().map_err(|e| StoreError::Codec(e.to_string()))
}
fn r_bool(src: &mut impl Read) -> Result<bool, StoreError> {
    Ok(r_u8(src)? != 0)
}
fn r_bytes(src: &mut impl Read) -> Result<Vec<u8>, StoreError> {
    let len = r_u32(src)? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf).map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(buf)
}
fn r_string(src: &mut impl Read) -> Result<String, StoreError> {
    String::from_utf8(r_bytes(src)?).map_err(|e| StoreError::Codec(e.to_string()))
}
fn r_array32(src: &mut impl Read) -> Result<[u8; 32], StoreError> {
    let mut buf = [0u8; 32];
    src.read_exact(&mut buf).map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(buf)
}

pub fn device_key(id: &DeviceId) -> Vec<u8> {
    id.0.to_vec()
}

pub fn encode_device(d: &Device) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &d.name);
    w_u32(&mut out, d.addresses.len() as u32);
    for addr in &d.addresses {
        w_string(&mut out, &addr.0);
    }
    w_u8(
        &mut out,
        match d.compression {
            Compression::Never => 0,
            Compression::Metadata => 1,
            Compression::Always => 2,
        },
    );
    w_bool(&mut out, d.introducer);
    out
}

pub fn decode_device(id: DeviceId, mut bytes: &[u8]) -> Result<Device, StoreError> {
    let name = r_string(&mut bytes)?;
    let addr_count = r_u32(&mut bytes)?;
    let mut addresses = Vec::with_capacity(addr_count as usize);
    for _ in 0..addr_count {
        addresses.push(ContactUri(r_string(&mut bytes)?));
    }
    let compression = match r_u8(&mut bytes)? {
        0 => Compression::Never,
        1 => Compression::Metadata,
        _ => Compression::Always,
    };
    let introducer = r_bool(&mut bytes)?;
    let mut device = Device::new(id, name);
    device.addresses = addresses;
    device.compression = compression;
    device.introducer = introducer;
    Ok(device)
}

pub fn folder_key(id: &FolderId) -> Vec<u8> {
    id.0.as_bytes().to_vec()
}

pub fn encode_folder(f: &Folder) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &f.label);
    w_string(&mut out, &f.path.to_string_lossy());
    w_u8(
        &mut out,
        match f.pull_order {
            PullOrder::Random => 0,
            PullOrder::Alphabetic => 1,
            PullOrder::SmallestFirst => 2,
            PullOrder::LargestFirst => 3,
            PullOrder::OldestFirst => 4,
            PullOrder::NewestFirst => 5,
        },
    );
    let flags = &f.flags;
    w_bool(&mut out, flags.read_only);
    w_bool(&mut out, flags.ignore_permissions);
    w_bool(&mut out, flags.ignore_deletes);
    w_bool(&mut out, flags.temp_indexes_disabled);
    w_bool(&mut out, flags.paused);
    w_bool(&mut out, flags.suspended);
    w_bool(&mut out, flags.scheduled);
    w_u32(&mut out, f.rescan_interval_s);
    out
}

pub fn decode_folder(id: FolderId, mut bytes: &[u8]) -> Result<Folder, StoreError> {
    let label = r_string(&mut bytes)?;
    let path = r_string(&mut bytes)?;
    let pull_order = match r_u8(&mut bytes)? {
        1 => PullOrder::Alphabetic,
        2 => PullOrder::SmallestFirst,
        3 => PullOrder::LargestFirst,
        4 => PullOrder::OldestFirst,
        5 => PullOrder::NewestFirst,
        _ => PullOrder::Random,
    };
    let flags = FolderFlags {
        read_only: r_bool(&mut bytes)?,
        ignore_permissions: r_bool(&mut bytes)?,
        ignore_deletes: r_bool(&mut bytes)?,
        temp_indexes_disabled: r_bool(&mut bytes)?,
        paused: r_bool(&mut bytes)?,
        suspended: r_bool(&mut bytes)?,
        scheduled: r_bool(&mut bytes)?,
    };
    let rescan_interval_s = r_u32(&mut bytes)?;
    let mut folder = Folder::new(id, label, path.into());
    folder.pull_order = pull_order;
    folder.flags = flags;
    folder.rescan_interval_s = rescan_interval_s;
    Ok(folder)
}

/// `folder_info` key = folder id bytes ‖ device sha256 (spec §6.3).
pub fn folder_info_key(folder: &FolderId, device: &DeviceId) -> Vec<u8> {
    let mut key = folder.0.as_bytes().to_vec();
    key.extend_from_slice(&device.0);
    key
}

pub fn encode_folder_info_header(fi: &FolderInfo) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(fi.id.0.as_bytes());
    w_u64(&mut out, fi.index_id);
    w_u64(&mut out, fi.max_sequence);
    w_bool(&mut out, fi.introducer_device_key.is_some());
    if let Some(key) = fi.introducer_device_key {
        out.extend_from_slice(&key.0);
    }
    out
}

// `FolderInfoId` wraps a 16-byte uuid, not 32 bytes, so it gets its own
// helper rather than reusing `r_array32`.
pub fn decode_folder_info_header(
    folder: FolderId,
    device: DeviceId,
    mut bytes: &[u8],
) -> Result<FolderInfo, StoreError> {
    let mut uuid_bytes = [0u8; 16];
    std::io::Read::read_exact(&mut bytes, &mut uuid_bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
    let id = FolderInfoId(uuid::Uuid::from_bytes(uuid_bytes));
    let index_id = r_u64(&mut bytes)?;
    let max_sequence = r_u64(&mut bytes)?;
    let has_introducer = r_bool(&mut bytes)?;
    let introducer_device_key = if has_introducer { Some(DeviceId(r_array32(&mut bytes)?)) } else { None };

    let mut fi = FolderInfo::new(folder, device, index_id);
    fi.id = id;
    fi.max_sequence = max_sequence;
    fi.introducer_device_key = introducer_device_key;
    Ok(fi)
}

/// `file_info` key = folder_info uuid ‖ file uuid (spec §6.3).
pub fn file_info_key(folder_info: FolderInfoId, file: FileInfoId) -> Vec<u8> {
    let mut key = folder_info.0.as_bytes().to_vec();
    key.extend_from_slice(file.0.as_bytes());
    key
}

pub fn encode_file_info(f: &FileInfo) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &f.name);
    w_u8(
        &mut out,
        match f.entry_type {
            EntryType::File => 0,
            EntryType::Directory => 1,
            EntryType::Symlink => 2,
        },
    );
    w_u64(&mut out, f.size);
    w_u32(&mut out, f.permissions);
    w_i64(&mut out, f.modified_s);
    w_u32(&mut out, f.modified_ns);
    out.extend_from_slice(&f.modified_by.0);
    w_bool(&mut out, f.deleted);
    w_bool(&mut out, f.invalid);
    w_bool(&mut out, f.no_permissions);
    w_bool(&mut out, f.symlink_target.is_some());
    if let Some(target) = &f.symlink_target {
        w_string(&mut out, target);
    }
    w_u32(&mut out, f.block_size);
    w_u64(&mut out, f.sequence);

    w_u32(&mut out, f.blocks.len() as u32);
    for b in &f.blocks {
        w_u64(&mut out, b.offset);
        w_u32(&mut out, b.size);
        out.extend_from_slice(&b.hash.0);
        w_u32(&mut out, b.weak_hash);
    }

    w_u32(&mut out, f.version.entries().len() as u32);
    for e in f.version.entries() {
        w_u64(&mut out, e.id.0);
        w_u64(&mut out, e.value);
    }
    out
}

pub fn decode_file_info(id: FileInfoId, mut bytes: &[u8]) -> Result<FileInfo, StoreError> {
    let name = r_string(&mut bytes)?;
    let entry_type = match r_u8(&mut bytes)? {
        1 => EntryType::Directory,
        2 => EntryType::Symlink,
        _ => EntryType::File,
    };
    let size = r_u64(&mut bytes)?;
    let permissions = r_u32(&mut bytes)?;
    let modified_s = r_i64(&mut bytes)?;
    let modified_ns = r_u32(&mut bytes)?;
    let modified_by = DeviceId(r_array32(&mut bytes)?);
    let deleted = r_bool(&mut bytes)?;
    let invalid = r_bool(&mut bytes)?;
    let no_permissions = r_bool(&mut bytes)?;
    let has_symlink = r_bool(&mut bytes)?;
    let symlink_target = if has_symlink { Some(r_string(&mut bytes)?) } else { None };
    let block_size = r_u32(&mut bytes)?;
    let sequence = r_u64(&mut bytes)?;

    let block_count = r_u32(&mut bytes)?;
    let mut blocks = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        let offset = r_u64(&mut bytes)?;
        let size = r_u32(&mut bytes)?;
        let hash = BlockHash(r_array32(&mut bytes)?);
        let weak_hash = r_u32(&mut bytes)?;
        blocks.push(crate::model::block::BlockRef { offset, size, hash, weak_hash });
    }

    let version_count = r_u32(&mut bytes)?;
    let mut entries = Vec::with_capacity(version_count as usize);
    for _ in 0..version_count {
        let id = ShortDeviceId(r_u64(&mut bytes)?);
        let value = r_u64(&mut bytes)?;
        entries.push(VersionEntry { id, value });
    }

    Ok(FileInfo {
        id,
        name,
        entry_type,
        size,
        permissions,
        modified_s,
        modified_ns,
        modified_by,
        deleted,
        invalid,
        no_permissions,
        symlink_target,
        block_size,
        sequence,
        blocks,
        version: VersionVector::from_entries(entries),
    })
}

pub fn block_key(hash: &BlockHash) -> Vec<u8> {
    hash.0.to_vec()
}

pub fn encode_block_info(b: &BlockInfo) -> Vec<u8> {
    let mut out = Vec::new();
    w_u32(&mut out, b.size);
    w_u32(&mut out, b.weak_hash);
    w_u64(&mut out, b.ref_count);
    out
}

pub fn decode_block_info(hash: BlockHash, mut bytes: &[u8]) -> Result<BlockInfo, StoreError> {
    let size = r_u32(&mut bytes)?;
    let weak_hash = r_u32(&mut bytes)?;
    let ref_count = r_u64(&mut bytes)?;
    Ok(BlockInfo { hash, size, weak_hash, ref_count })
}

pub fn encode_pending_device(row: &PendingDevice) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &row.last_seen.0);
    w_string(&mut out, &row.name);
    out
}

pub fn decode_pending_device(id: DeviceId, mut bytes: &[u8]) -> Result<PendingDevice, StoreError> {
    Ok(PendingDevice { id, last_seen: ContactUri(r_string(&mut bytes)?), name: r_string(&mut bytes)? })
}

pub fn encode_ignored_device(row: &IgnoredDevice) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &row.last_seen.0);
    w_string(&mut out, &row.name);
    out
}

pub fn decode_ignored_device(id: DeviceId, mut bytes: &[u8]) -> Result<IgnoredDevice, StoreError> {
    Ok(IgnoredDevice { id, last_seen: ContactUri(r_string(&mut bytes)?), name: r_string(&mut bytes)? })
}

pub fn encode_pending_folder(row: &PendingFolder) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &row.label);
    out.extend_from_slice(&row.offered_by.0);
    w_u64(&mut out, row.index_id);
    w_u64(&mut out, row.max_sequence);
    out
}

pub fn decode_pending_folder(folder: FolderId, mut bytes: &[u8]) -> Result<PendingFolder, StoreError> {
    let label = r_string(&mut bytes)?;
    let offered_by = DeviceId(r_array32(&mut bytes)?);
    let index_id = r_u64(&mut bytes)?;
    let max_sequence = r_u64(&mut bytes)?;
    Ok(PendingFolder { folder, label, offered_by, index_id, max_sequence })
}

pub fn encode_ignored_folder(row: &IgnoredFolder) -> Vec<u8> {
    let mut out = Vec::new();
    w_string(&mut out, &row.label);
    out
}

pub fn decode_ignored_folder(folder: FolderId, mut bytes: &[u8]) -> Result<IgnoredFolder, StoreError> {
    Ok(IgnoredFolder { folder, label: r_string(&mut bytes)? })
}

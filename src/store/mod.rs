//! The durability layer (spec §4.3, §6.3): a `redb`-backed key-value store
//! mirroring the in-memory cluster model, with typed key prefixes per row
//! kind and a version row driving schema migrations.

pub mod actor;
mod codec;

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

use crate::model::block::{BlockHash, BlockInfo};
use crate::model::device::Device;
use crate::model::file_info::{FileInfo, FileInfoId};
use crate::model::folder::Folder;
use crate::model::folder_info::{FolderInfo, FolderInfoId};
use crate::model::pending::{IgnoredDevice, IgnoredFolder, PendingDevice, PendingFolder};
use crate::model::{DeviceId, FolderId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),
    #[error("database transaction failed: {0}")]
    Transaction(String),
    #[error("row codec error: {0}")]
    Codec(String),
    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaVersion { found: u32, expected: u32 },
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transaction(e.to_string())
}

const DEVICES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("device");
const FOLDERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("folder");
const FOLDER_INFOS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("folder_info");
const FILE_INFOS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("file_info");
const BLOCK_INFOS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("block_info");
const IGNORED_DEVICES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ignored_device");
const PENDING_DEVICES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending_device");
const IGNORED_FOLDERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ignored_folder");
const PENDING_FOLDERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending_folder");
const META: TableDefinition<&str, u32> = TableDefinition::new("meta");

const SCHEMA_VERSION: u32 = 1;
const VERSION_KEY: &str = "version";

/// Thin wrapper around a `redb::Database` implementing the row layout from
/// spec §6.3. All writes happen in a single transaction per call here; the
/// [`actor::DatabaseActor`] batches many diff-driven writes into one
/// transaction instead.
pub struct Store {
    db: Database,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Open(e.to_string()))?;
        let store = Self { db };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut meta = txn.open_table(META).map_err(db_err)?;
            let current = meta.get(VERSION_KEY).map_err(db_err)?.map(|v| v.value()).unwrap_or(0);
            if current > SCHEMA_VERSION {
                return Err(StoreError::SchemaVersion { found: current, expected: SCHEMA_VERSION });
            }
            if current < SCHEMA_VERSION {
                meta.insert(VERSION_KEY, SCHEMA_VERSION).map_err(db_err)?;
            }
            // Open every other table so a brand-new database file has all
            // the row kinds present before the first real write.
            txn.open_table(DEVICES).map_err(db_err)?;
            txn.open_table(FOLDERS).map_err(db_err)?;
            txn.open_table(FOLDER_INFOS).map_err(db_err)?;
            txn.open_table(FILE_INFOS).map_err(db_err)?;
            txn.open_table(BLOCK_INFOS).map_err(db_err)?;
            txn.open_table(IGNORED_DEVICES).map_err(db_err)?;
            txn.open_table(PENDING_DEVICES).map_err(db_err)?;
            txn.open_table(IGNORED_FOLDERS).map_err(db_err)?;
            txn.open_table(PENDING_FOLDERS).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn put_device(&self, device: &Device) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(DEVICES).map_err(db_err)?;
            table.insert(codec::device_key(&device.id).as_slice(), codec::encode_device(device).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn remove_device(&self, id: &DeviceId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(DEVICES).map_err(db_err)?;
            table.remove(codec::device_key(id).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(DEVICES).map_err(db_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (key, value) = row.map_err(db_err)?;
            let mut id = [0u8; 32];
            id.copy_from_slice(key.value());
            out.push(codec::decode_device(DeviceId(id), value.value())?);
        }
        Ok(out)
    }

    pub fn put_folder(&self, folder: &Folder) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(FOLDERS).map_err(db_err)?;
            table.insert(codec::folder_key(&folder.id).as_slice(), codec::encode_folder(folder).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn remove_folder(&self, id: &FolderId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(FOLDERS).map_err(db_err)?;
            table.remove(codec::folder_key(id).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn load_folders(&self) -> Result<Vec<Folder>, StoreError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(FOLDERS).map_err(db_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (key, value) = row.map_err(db_err)?;
            let id = FolderId(String::from_utf8_lossy(key.value()).into_owned());
            out.push(codec::decode_folder(id, value.value())?);
        }
        Ok(out)
    }

    /// Drops a folder-info row and every file-info row filed under it
    /// (spec §4.3: removing a folder-info cascades to its files).
    pub fn remove_folder_info(&self, fi: &FolderInfo) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(FOLDER_INFOS).map_err(db_err)?;
            let key = codec::folder_info_key(&fi.folder, &fi.device);
            table.remove(key.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        for file in fi.files() {
            self.remove_file_info(fi.id, file.id)?;
        }
        Ok(())
    }

    pub fn put_folder_info(&self, fi: &FolderInfo) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(FOLDER_INFOS).map_err(db_err)?;
            let key = codec::folder_info_key(&fi.folder, &fi.device);
            table.insert(key.as_slice(), codec::encode_folder_info_header(fi).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        for file in fi.files() {
            self.put_file_info(fi.id, file)?;
        }
        Ok(())
    }

    pub fn load_folder_infos(&self) -> Result<Vec<FolderInfo>, StoreError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(FOLDER_INFOS).map_err(db_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (key, value) = row.map_err(db_err)?;
            let raw = key.value();
            let folder = FolderId(String::from_utf8_lossy(&raw[..raw.len() - 32]).into_owned());
            let mut device_bytes = [0u8; 32];
            device_bytes.copy_from_slice(&raw[raw.len() - 32..]);
            let device = DeviceId(device_bytes);
            let mut fi = codec::decode_folder_info_header(folder, device, value.value())?;
            for file in self.load_file_infos(fi.id)? {
                fi.upsert_file(file);
            }
            out.push(fi);
        }
        Ok(out)
    }

    pub fn put_file_info(&self, folder_info: FolderInfoId, file: &FileInfo) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(FILE_INFOS).map_err(db_err)?;
            let key = codec::file_info_key(folder_info, file.id);
            table.insert(key.as_slice(), codec::encode_file_info(file).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn remove_file_info(&self, folder_info: FolderInfoId, file: FileInfoId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(FILE_INFOS).map_err(db_err)?;
            table.remove(codec::file_info_key(folder_info, file).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    fn load_file_infos(&self, folder_info: FolderInfoId) -> Result<Vec<FileInfo>, StoreError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(FILE_INFOS).map_err(db_err)?;
        let prefix = folder_info.0.as_bytes().to_vec();
        let mut out = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (key, value) = row.map_err(db_err)?;
            let raw = key.value();
            if !raw.starts_with(&prefix) {
                continue;
            }
            let mut file_uuid_bytes = [0u8; 16];
            file_uuid_bytes.copy_from_slice(&raw[16..32]);
            let file_id = FileInfoId(uuid::Uuid::from_bytes(file_uuid_bytes));
            out.push(codec::decode_file_info(file_id, value.value())?);
        }
        Ok(out)
    }

    pub fn put_block(&self, block: &BlockInfo) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(BLOCK_INFOS).map_err(db_err)?;
            table.insert(codec::block_key(&block.hash).as_slice(), codec::encode_block_info(block).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn remove_block(&self, hash: &BlockHash) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(BLOCK_INFOS).map_err(db_err)?;
            table.remove(codec::block_key(hash).as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn load_blocks_chunked(&self, chunk_size: usize) -> Result<Vec<Vec<BlockInfo>>, StoreError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(BLOCK_INFOS).map_err(db_err)?;
        let mut all = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (key, value) = row.map_err(db_err)?;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(key.value());
            all.push(codec::decode_block_info(BlockHash(hash), value.value())?);
        }
        Ok(all.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect())
    }

    pub fn put_pending_device(&self, row: &PendingDevice) -> Result<(), StoreError> {
        self.put_simple(PENDING_DEVICES, &row.id.0, &codec::encode_pending_device(row))
    }

    pub fn load_pending_devices(&self) -> Result<Vec<PendingDevice>, StoreError> {
        self.load_simple(PENDING_DEVICES, |k, v| {
            let mut id = [0u8; 32];
            id.copy_from_slice(k);
            codec::decode_pending_device(DeviceId(id), v)
        })
    }

    pub fn remove_pending_device(&self, id: &DeviceId) -> Result<(), StoreError> {
        self.remove_simple(PENDING_DEVICES, &id.0)
    }

    pub fn put_ignored_device(&self, row: &IgnoredDevice) -> Result<(), StoreError> {
        self.put_simple(IGNORED_DEVICES, &row.id.0, &codec::encode_ignored_device(row))
    }

    pub fn load_ignored_devices(&self) -> Result<Vec<IgnoredDevice>, StoreError> {
        self.load_simple(IGNORED_DEVICES, |k, v| {
            let mut id = [0u8; 32];
            id.copy_from_slice(k);
            codec::decode_ignored_device(DeviceId(id), v)
        })
    }

    pub fn put_pending_folder(&self, row: &PendingFolder) -> Result<(), StoreError> {
        self.put_simple(PENDING_FOLDERS, row.folder.0.as_bytes(), &codec::encode_pending_folder(row))
    }

    pub fn load_pending_folders(&self) -> Result<Vec<PendingFolder>, StoreError> {
        self.load_simple(PENDING_FOLDERS, |k, v| {
            codec::decode_pending_folder(FolderId(String::from_utf8_lossy(k).into_owned()), v)
        })
    }

    pub fn remove_pending_folder(&self, id: &FolderId) -> Result<(), StoreError> {
        self.remove_simple(PENDING_FOLDERS, id.0.as_bytes())
    }

    pub fn put_ignored_folder(&self, row: &IgnoredFolder) -> Result<(), StoreError> {
        self.put_simple(IGNORED_FOLDERS, row.folder.0.as_bytes(), &codec::encode_ignored_folder(row))
    }

    pub fn load_ignored_folders(&self) -> Result<Vec<IgnoredFolder>, StoreError> {
        self.load_simple(IGNORED_FOLDERS, |k, v| {
            codec::decode_ignored_folder(FolderId(String::from_utf8_lossy(k).into_owned()), v)
        })
    }

    fn put_simple(&self, table_def: TableDefinition<&[u8], &[u8]>, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(table_def).map_err(db_err)?;
            table.insert(key, value).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    fn remove_simple(&self, table_def: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(table_def).map_err(db_err)?;
            table.remove(key).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    fn load_simple<T>(
        &self,
        table_def: TableDefinition<&[u8], &[u8]>,
        decode: impl Fn(&[u8], &[u8]) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(table_def).map_err(db_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(db_err)? {
            let (key, value) = row.map_err(db_err)?;
            out.push(decode(key.value(), value.value())?);
        }
        Ok(out)
    }
}

//! The file I/O service (spec §4.7): a request-reply actor batching disk
//! commands over one channel so peer controllers and the scanner never
//! touch `std::fs` directly.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::IoFailure;

pub const TEMP_SUFFIX: &str = ".syncspirit-tmp";

pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

pub struct BlockRequest {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u32,
}

pub struct RemoteCopy {
    pub final_path: PathBuf,
    pub expected_size: u64,
}

pub struct AppendBlock {
    pub final_path: PathBuf,
    pub offset: u64,
    pub data: Vec<u8>,
}

pub struct CloneBlock {
    pub src_path: PathBuf,
    pub src_offset: u64,
    pub dst_final_path: PathBuf,
    pub dst_offset: u64,
    pub size: u32,
}

pub struct FinishFile {
    pub final_path: PathBuf,
    pub modified_s: i64,
    pub permissions: Option<u32>,
}

pub struct CreateDir {
    pub path: PathBuf,
}

enum Command {
    BlockRequest(BlockRequest, oneshot::Sender<Result<Vec<u8>, IoFailure>>),
    RemoteCopy(RemoteCopy, oneshot::Sender<Result<(), IoFailure>>),
    AppendBlock(AppendBlock, oneshot::Sender<Result<(), IoFailure>>),
    CloneBlock(CloneBlock, oneshot::Sender<Result<(), IoFailure>>),
    FinishFile(FinishFile, oneshot::Sender<Result<(), IoFailure>>),
    CreateDir(CreateDir, oneshot::Sender<Result<(), IoFailure>>),
}

/// Cheaply-cloned front door to a running [`FileIoService`].
#[derive(Clone)]
pub struct FileIoHandle {
    tx: mpsc::Sender<Command>,
}

macro_rules! round_trip {
    ($name:ident, $req:ty, $ok:ty, $variant:ident) => {
        pub async fn $name(&self, req: $req) -> Result<$ok, IoFailure> {
            let (reply_tx, reply_rx) = oneshot::channel();
            let failure = |path: &Path| IoFailure {
                path: path.to_path_buf(),
                os_code: None,
                message: "file I/O service is unavailable".into(),
            };
            self.tx
                .send(Command::$variant(req, reply_tx))
                .await
                .map_err(|_| failure(Path::new("")))?;
            reply_rx.await.map_err(|_| failure(Path::new("")))?
        }
    };
}

impl FileIoHandle {
    round_trip!(block_request, BlockRequest, Vec<u8>, BlockRequest);
    round_trip!(remote_copy, RemoteCopy, (), RemoteCopy);
    round_trip!(append_block, AppendBlock, (), AppendBlock);
    round_trip!(clone_block, CloneBlock, (), CloneBlock);
    round_trip!(finish_file, FinishFile, (), FinishFile);
    round_trip!(create_dir, CreateDir, (), CreateDir);
}

/// Actor owning every open file descriptor used to pull/push blocks (spec
/// §4.7). `ignore_permissions` / `supports_symlinks` are fixed at
/// construction per folder policy and platform capability.
pub struct FileIoService {
    rx: mpsc::Receiver<Command>,
    handles: Cache<PathBuf, Arc<Mutex<File>>>,
    ignore_permissions: bool,
}

impl FileIoService {
    pub fn spawn(queue_depth: usize, ignore_permissions: bool) -> (FileIoHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let handles = Cache::builder().max_capacity(256).build();
        let service = Self { rx, handles, ignore_permissions };
        let join = tokio::spawn(async move { service.run().await });
        (FileIoHandle { tx }, join)
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::BlockRequest(req, reply) => {
                    let _ = reply.send(self.handle_block_request(req).await);
                }
                Command::RemoteCopy(req, reply) => {
                    let _ = reply.send(self.handle_remote_copy(req).await);
                }
                Command::AppendBlock(req, reply) => {
                    let _ = reply.send(self.handle_append_block(req).await);
                }
                Command::CloneBlock(req, reply) => {
                    let _ = reply.send(self.handle_clone_block(req).await);
                }
                Command::FinishFile(req, reply) => {
                    let _ = reply.send(self.handle_finish_file(req).await);
                }
                Command::CreateDir(req, reply) => {
                    let _ = reply.send(self.handle_create_dir(req).await);
                }
            }
        }
    }

    async fn handle_block_request(&self, req: BlockRequest) -> Result<Vec<u8>, IoFailure> {
        let handle = self.open_for_read(&req.path).await?;
        let mut file = handle.lock().await;
        file.seek(SeekFrom::Start(req.offset))
            .await
            .map_err(|e| IoFailure::from_io_error(req.path.clone(), &e))?;
        let mut buf = vec![0u8; req.size as usize];
        file.read_exact(&mut buf).await.map_err(|e| IoFailure::from_io_error(req.path.clone(), &e))?;
        Ok(buf)
    }

    /// Creates the `.syncspirit-tmp` file sparse at the expected final size
    /// (spec §4.7).
    async fn handle_remote_copy(&self, req: RemoteCopy) -> Result<(), IoFailure> {
        let tmp = temp_path(&req.final_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .await
            .map_err(|e| IoFailure::from_io_error(tmp.clone(), &e))?;
        file.set_len(req.expected_size).await.map_err(|e| IoFailure::from_io_error(tmp.clone(), &e))?;
        self.handles.insert(tmp, Arc::new(Mutex::new(file)));
        Ok(())
    }

    async fn handle_append_block(&self, req: AppendBlock) -> Result<(), IoFailure> {
        let tmp = temp_path(&req.final_path);
        let handle = self.open_for_write(&tmp).await?;
        let mut file = handle.lock().await;
        file.seek(SeekFrom::Start(req.offset)).await.map_err(|e| IoFailure::from_io_error(tmp.clone(), &e))?;
        file.write_all(&req.data).await.map_err(|e| IoFailure::from_io_error(tmp.clone(), &e))?;
        Ok(())
    }

    /// Copies a block already present on disk elsewhere, avoiding a network
    /// round trip (spec §4.4 "schedule a clone I/O").
    async fn handle_clone_block(&self, req: CloneBlock) -> Result<(), IoFailure> {
        let src_handle = self.open_for_read(&req.src_path).await?;
        let mut buf = vec![0u8; req.size as usize];
        {
            let mut src = src_handle.lock().await;
            src.seek(SeekFrom::Start(req.src_offset))
                .await
                .map_err(|e| IoFailure::from_io_error(req.src_path.clone(), &e))?;
            src.read_exact(&mut buf).await.map_err(|e| IoFailure::from_io_error(req.src_path.clone(), &e))?;
        }
        self.handle_append_block(AppendBlock { final_path: req.dst_final_path, offset: req.dst_offset, data: buf })
            .await
    }

    /// Sets mtime/permissions then atomically renames the temp file onto
    /// the final path (spec §4.7).
    async fn handle_finish_file(&self, req: FinishFile) -> Result<(), IoFailure> {
        let tmp = temp_path(&req.final_path);
        self.handles.invalidate(&tmp);

        if let Some(mode) = req.permissions {
            if !self.ignore_permissions {
                set_permissions(&tmp, mode).map_err(|e| IoFailure::from_io_error(tmp.clone(), &e))?;
            }
        }
        let mtime = filetime::FileTime::from_unix_time(req.modified_s, 0);
        filetime::set_file_mtime(&tmp, mtime).map_err(|e| IoFailure::from_io_error(tmp.clone(), &e))?;

        fs::rename(&tmp, &req.final_path)
            .await
            .map_err(|e| IoFailure::from_io_error(req.final_path.clone(), &e))?;
        Ok(())
    }

    async fn handle_create_dir(&self, req: CreateDir) -> Result<(), IoFailure> {
        fs::create_dir_all(&req.path).await.map_err(|e| IoFailure::from_io_error(req.path.clone(), &e))
    }

    async fn open_for_read(&self, path: &Path) -> Result<Arc<Mutex<File>>, IoFailure> {
        self.open(path, false).await
    }

    async fn open_for_write(&self, path: &Path) -> Result<Arc<Mutex<File>>, IoFailure> {
        self.open(path, true).await
    }

    async fn open(&self, path: &Path, write: bool) -> Result<Arc<Mutex<File>>, IoFailure> {
        if let Some(handle) = self.handles.get(&path.to_path_buf()) {
            return Ok(handle);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .open(path)
            .await
            .map_err(|e| IoFailure::from_io_error(path.to_path_buf(), &e))?;
        let handle = Arc::new(Mutex::new(file));
        self.handles.insert(path.to_path_buf(), handle.clone());
        Ok(handle)
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

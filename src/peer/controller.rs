//! Per-peer controller (spec §4.4): the BEP handshake, then steady-state
//! multiplexing of the outbound index stream, pull loop, and inbound
//! request service over one `tokio::select!` loop. One controller per
//! connected peer; the read side runs as a separate task
//! ([`super::read_task::PeerReadTask`]) feeding events in, mirroring the
//! teacher's read-task / write-half split.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bep::message::{Message, ResponseCode, WireFileInfo};
use crate::bep::{compression, frame, serializer, BepError};
use crate::diff::{DiffKind, DiffNode};
use crate::error::IoFailure;
use crate::fileio::{AppendBlock, BlockRequest, CloneBlock, FileIoHandle, FinishFile, RemoteCopy};
use crate::hasher::{HashContext, HashJob, HasherHandle, HasherPool};
use crate::model::block::BlockHash;
use crate::model::device::{Compression, DeviceId};
use crate::model::file_info::FileInfoId;
use crate::model::folder::FolderId;

use super::read_task::ReadEvent;
use super::request_ring::{PendingBlock, RequestRing};

pub const DEFAULT_INBOUND_SILENCE: Duration = Duration::from_secs(120);
pub const DEFAULT_OUTBOUND_SILENCE: Duration = Duration::from_secs(60);
const MAX_BLOCKS_REQUESTED: usize = 16;
const TX_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Started,
    AwaitingHello,
    Running,
    Down,
}

/// One block this controller should fetch from its peer, handed in by the
/// coordinator's pull-loop driver (spec §4.4 `file_iterator` /
/// `block_iterator`). `local_source` lets the coordinator short-circuit a
/// block that is already available somewhere in the cluster: the
/// controller clones it instead of issuing a wire `Request`.
#[derive(Debug, Clone)]
pub struct FetchBlock {
    pub folder: FolderId,
    pub file: FileInfoId,
    pub file_name: String,
    pub offset: u64,
    pub size: u32,
    pub block_index: usize,
    pub expected_hash: BlockHash,
    pub weak_hash: u32,
    pub local_source: Option<std::path::PathBuf>,
    /// Set on the first block of a file: the controller creates the sparse
    /// `.syncspirit-tmp` file at this size before fetching (spec §4.7).
    pub file_total_size: Option<u64>,
}

pub enum PeerCommand {
    SendIndex { folder: FolderId, files: Vec<WireFileInfo> },
    SendIndexUpdate { folder: FolderId, files: Vec<WireFileInfo> },
    Fetch(FetchBlock),
    Shutdown { reason: String },
}

/// What the controller reports back to the coordinator: either a diff to
/// apply to the cluster, or the connection closing.
pub enum PeerEvent {
    Diff(DiffNode),
    Closed { reason: Option<String> },
}

#[derive(Clone)]
pub struct PeerHandle {
    cmd_tx: mpsc::Sender<PeerCommand>,
}

impl PeerHandle {
    pub async fn send(&self, cmd: PeerCommand) {
        let _ = self.cmd_tx.send(cmd).await;
    }
}

pub struct PeerController<W> {
    device: DeviceId,
    write_half: W,
    cmd_rx: mpsc::Receiver<PeerCommand>,
    read_rx: mpsc::Receiver<ReadEvent>,
    event_tx: mpsc::Sender<PeerEvent>,
    fileio: FileIoHandle,
    hasher: HasherHandle,
    hash_results: mpsc::Receiver<crate::hasher::HashResult>,
    _hasher_workers: Vec<JoinHandle<()>>,
    state: ControllerState,
    ring: RequestRing,
    /// Maps a hash job's (file uuid, block index) back to the request id
    /// and raw bytes waiting on its digest, since `HashContext` doesn't
    /// carry a BEP request id and `HashResult` doesn't carry the data back.
    digest_waiters: HashMap<(uuid::Uuid, usize), (i32, Vec<u8>)>,
    compression: Compression,
    device_name: String,
    client_name: String,
    client_version: String,
    last_inbound: Instant,
    last_outbound: Instant,
}

impl<W: AsyncWrite + Unpin + Send + 'static> PeerController<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        device: DeviceId,
        write_half: W,
        read_rx: mpsc::Receiver<ReadEvent>,
        fileio: FileIoHandle,
        device_name: String,
        client_name: String,
        client_version: String,
        event_tx: mpsc::Sender<PeerEvent>,
    ) -> (PeerHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (hasher, hash_results, hasher_workers) = HasherPool::spawn(2, 32);
        let controller = Self {
            device,
            write_half,
            cmd_rx,
            read_rx,
            event_tx,
            fileio,
            hasher,
            hash_results,
            _hasher_workers: hasher_workers,
            state: ControllerState::Started,
            ring: RequestRing::new(),
            digest_waiters: HashMap::new(),
            compression: Compression::default(),
            device_name,
            client_name,
            client_version,
            last_inbound: Instant::now(),
            last_outbound: Instant::now(),
        };
        let handle = PeerHandle { cmd_tx };
        (handle, tokio::spawn(controller.run()))
    }

    async fn run(mut self) {
        let hello = Message::Hello {
            device_name: self.device_name.clone(),
            client_name: self.client_name.clone(),
            client_version: self.client_version.clone(),
        };
        let Ok(body) = serializer::message(&hello) else { return };
        if frame::write_hello(&mut self.write_half, &body).await.is_err() {
            return;
        }
        self.last_outbound = Instant::now();
        self.state = ControllerState::AwaitingHello;

        let mut idle_timer = tokio::time::interval(Duration::from_secs(5));
        idle_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.read_rx.recv() => {
                    match event {
                        Some(ReadEvent::Message(msg)) => {
                            self.last_inbound = Instant::now();
                            if let Err(reason) = self.on_message(msg).await {
                                self.shut_down_involuntarily(reason).await;
                                return;
                            }
                        }
                        Some(ReadEvent::Error(err)) => {
                            self.shut_down_involuntarily(err.to_string()).await;
                            return;
                        }
                        Some(ReadEvent::Eof) | None => {
                            self.shut_down_involuntarily("connection closed by peer".into()).await;
                            return;
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(PeerCommand::Shutdown { reason }) => {
                            self.shut_down_voluntarily(reason).await;
                            return;
                        }
                        Some(cmd) => {
                            if let Err(err) = self.on_command(cmd).await {
                                self.shut_down_involuntarily(err).await;
                                return;
                            }
                        }
                        None => {
                            self.shut_down_voluntarily("coordinator handle dropped".into()).await;
                            return;
                        }
                    }
                }
                Some(result) = self.hash_results.recv() => {
                    self.on_digest(result).await;
                }
                _ = idle_timer.tick() => {
                    if self.state == ControllerState::Down {
                        return;
                    }
                    if self.last_inbound.elapsed() > DEFAULT_INBOUND_SILENCE {
                        self.shut_down_involuntarily("inbound silence timeout".into()).await;
                        return;
                    }
                    if self.state == ControllerState::Running && self.last_outbound.elapsed() >= DEFAULT_OUTBOUND_SILENCE {
                        if self.write_message(&Message::Ping, false).await.is_err() {
                            self.shut_down_involuntarily("ping write failed".into()).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn write_message(&mut self, msg: &Message, is_index_like: bool) -> Result<(), BepError> {
        let body = serializer::message(msg)?;
        let should_compress = compression::should_compress(self.compression, body.len(), is_index_like);
        let payload = if should_compress { compression::compress(&body)? } else { body };
        frame::write_frame(&mut self.write_half, msg.tag(), should_compress, &payload).await?;
        self.last_outbound = Instant::now();
        Ok(())
    }

    async fn on_message(&mut self, msg: Message) -> Result<(), String> {
        match (self.state, msg) {
            (ControllerState::AwaitingHello, Message::Hello { .. }) => {
                self.state = ControllerState::Running;
                self.emit(DiffKind::PeerState {
                    device: self.device,
                    state: crate::model::device::DeviceState::offline(0)
                        .with_connection(crate::model::device::ConnectionState::Connected),
                })
                .await;
                Ok(())
            }
            (ControllerState::Running, Message::ClusterConfig { .. }) => {
                self.emit(DiffKind::PeerState {
                    device: self.device,
                    state: crate::model::device::DeviceState::offline(0)
                        .with_connection(crate::model::device::ConnectionState::Online(
                            crate::model::device::ContactUri("tcp://peer".into()),
                        )),
                })
                .await;
                Ok(())
            }
            (ControllerState::Running, Message::Index { folder, files } | Message::IndexUpdate { folder, files }) => {
                for f in files {
                    self.emit(DiffKind::UpsertFile {
                        folder: FolderId(folder.clone()),
                        device: self.device,
                        file: wire_file_to_model(f, self.device),
                    })
                    .await;
                }
                Ok(())
            }
            (ControllerState::Running, Message::Request { id, folder, name, offset, size, hash, .. }) => {
                self.serve_request(id, folder, name, offset, size, BlockHash(hash)).await
            }
            (ControllerState::Running, Message::Response { id, data, code }) => {
                self.on_response(id, data, code).await
            }
            (ControllerState::Running, Message::DownloadProgress { .. }) => Ok(()),
            (ControllerState::Running, Message::Ping) => Ok(()),
            (_, Message::Close { reason }) => Err(format!("peer closed: {reason}")),
            (state, _) => Err(format!("unexpected message in state {state:?}")),
        }
    }

    async fn serve_request(
        &mut self,
        id: i32,
        folder: String,
        name: String,
        offset: u64,
        size: u32,
        hash: BlockHash,
    ) -> Result<(), String> {
        if self.ring.in_flight_count() >= MAX_BLOCKS_REQUESTED * TX_FACTOR {
            let response = Message::Response { id, data: Vec::new(), code: ResponseCode::Generic };
            return self.write_message(&response, false).await.map_err(|e| e.to_string());
        }
        let path = std::path::PathBuf::from(&folder).join(&name);
        let result = self
            .fileio
            .block_request(BlockRequest { path, offset, size })
            .await;
        let (code, data) = match result {
            Ok(bytes) => (ResponseCode::NoError, bytes),
            Err(_) => (ResponseCode::NoSuchFile, Vec::new()),
        };
        let _ = hash;
        let response = Message::Response { id, data, code };
        self.write_message(&response, false).await.map_err(|e| e.to_string())
    }

    async fn on_response(&mut self, id: i32, data: Vec<u8>, code: ResponseCode) -> Result<(), String> {
        let Some(pending) = self.ring.get(id).cloned() else {
            return Err(format!("response for unknown request id {id}"));
        };
        if code != ResponseCode::NoError {
            self.ring.release(id);
            return Ok(());
        }
        let block_index = (pending.offset / data.len().max(1) as u64) as usize;
        let ctx = HashContext { folder: pending.folder.clone(), file: pending.file.0, block_index };
        self.digest_waiters.insert((pending.file.0, block_index), (id, data.clone()));
        let _ = self.hasher.hash(HashJob { ctx, data }).await;
        Ok(())
    }

    async fn on_digest(&mut self, result: crate::hasher::HashResult) {
        let key = (result.ctx.file, result.ctx.block_index);
        let Some((id, data)) = self.digest_waiters.remove(&key) else { return };
        let Some(pending) = self.ring.release(id) else { return };
        if result.hash != pending.expected_hash {
            self.emit(DiffKind::IoFailure(IoFailure {
                path: std::path::PathBuf::from(&pending.file_name),
                os_code: None,
                message: "block digest mismatch".into(),
            }))
            .await;
            return;
        }
        let final_path = std::path::PathBuf::from(&pending.folder.0).join(&pending.file_name);
        if self
            .fileio
            .append_block(AppendBlock { final_path, offset: pending.offset, data })
            .await
            .is_ok()
        {
            self.emit(DiffKind::BlockAcknowledgement {
                folder: pending.folder,
                device: self.device,
                file: pending.file.0,
                block: pending.expected_hash,
            })
            .await;
        }
    }

    async fn on_command(&mut self, cmd: PeerCommand) -> Result<(), String> {
        match cmd {
            PeerCommand::SendIndex { folder, files } => {
                self.write_message(&Message::Index { folder: folder.0, files }, true).await.map_err(|e| e.to_string())
            }
            PeerCommand::SendIndexUpdate { folder, files } => self
                .write_message(&Message::IndexUpdate { folder: folder.0, files }, true)
                .await
                .map_err(|e| e.to_string()),
            PeerCommand::Fetch(fetch) => self.start_fetch(fetch).await,
            PeerCommand::Shutdown { .. } => unreachable!("handled by caller"),
        }
    }

    async fn start_fetch(&mut self, fetch: FetchBlock) -> Result<(), String> {
        let final_path = std::path::PathBuf::from(&fetch.folder.0).join(&fetch.file_name);
        if let Some(total_size) = fetch.file_total_size {
            self.fileio
                .remote_copy(RemoteCopy { final_path: final_path.clone(), expected_size: total_size })
                .await
                .map_err(|e| e.to_string())?;
        }

        if let Some(src_path) = fetch.local_source {
            self.fileio
                .clone_block(CloneBlock {
                    src_path,
                    src_offset: 0,
                    dst_final_path: final_path,
                    dst_offset: fetch.offset,
                    size: fetch.size,
                })
                .await
                .map_err(|e| e.to_string())?;
            self.emit(DiffKind::BlockAcknowledgement {
                folder: fetch.folder,
                device: self.device,
                file: fetch.file.0,
                block: fetch.expected_hash,
            })
            .await;
            return Ok(());
        }

        let pending = PendingBlock {
            folder: fetch.folder.clone(),
            file: fetch.file,
            file_name: fetch.file_name.clone(),
            offset: fetch.offset,
            expected_hash: fetch.expected_hash,
        };
        let id = self.ring.acquire(pending);
        let request = Message::Request {
            id,
            folder: fetch.folder.0,
            name: fetch.file_name,
            offset: fetch.offset,
            size: fetch.size,
            hash: fetch.expected_hash.0,
            from_temporary: true,
            weak_hash: fetch.weak_hash,
        };
        self.write_message(&request, false).await.map_err(|e| e.to_string())
    }

    pub async fn finish_file(&mut self, folder: &FolderId, file_name: &str, modified_s: i64, permissions: Option<u32>) -> Result<(), String> {
        let final_path = std::path::PathBuf::from(&folder.0).join(file_name);
        self.fileio
            .finish_file(FinishFile { final_path, modified_s, permissions })
            .await
            .map_err(|e| e.to_string())
    }

    async fn emit(&mut self, kind: DiffKind) {
        let _ = self.event_tx.send(PeerEvent::Diff(DiffNode::leaf(kind))).await;
    }

    async fn shut_down_voluntarily(&mut self, reason: String) {
        self.state = ControllerState::Down;
        let _ = self.write_message(&Message::Close { reason: reason.clone() }, false).await;
        let _ = self.write_half.flush().await;
        self.fail_pending();
        let _ = self.event_tx.send(PeerEvent::Closed { reason: Some(reason) }).await;
    }

    async fn shut_down_involuntarily(&mut self, reason: String) {
        self.state = ControllerState::Down;
        self.fail_pending();
        tracing::warn!(device = ?self.device, reason, "peer controller shut down involuntarily");
        let _ = self.event_tx.send(PeerEvent::Closed { reason: None }).await;
    }

    fn fail_pending(&mut self) {
        for pending in self.ring.drain() {
            tracing::debug!(file = %pending.file_name, "cancelling in-flight block request on shutdown");
        }
        self.digest_waiters.clear();
    }
}

fn wire_file_to_model(f: WireFileInfo, modified_by_fallback: DeviceId) -> crate::model::file_info::FileInfo {
    use crate::model::file_info::{EntryType, FileInfo, FileInfoId};
    use crate::model::version_vector::{ShortDeviceId, VersionEntry, VersionVector};

    let entry_type = match f.entry_type {
        crate::bep::message::WireEntryType::File => EntryType::File,
        crate::bep::message::WireEntryType::Directory => EntryType::Directory,
        crate::bep::message::WireEntryType::Symlink => EntryType::Symlink,
    };
    let blocks = f
        .blocks
        .into_iter()
        .map(|b| crate::model::block::BlockRef { offset: b.offset, size: b.size, hash: BlockHash(b.hash), weak_hash: b.weak_hash })
        .collect();
    let version = VersionVector::from_entries(
        f.version.into_iter().map(|e| VersionEntry { id: ShortDeviceId(e.id), value: e.value }).collect(),
    );
    let modified_by = if f.modified_by == [0u8; 32] { modified_by_fallback } else { DeviceId(f.modified_by) };

    FileInfo {
        id: FileInfoId::generate(),
        name: f.name,
        entry_type,
        size: f.size,
        permissions: f.permissions,
        modified_s: f.modified_s,
        modified_ns: f.modified_ns,
        modified_by,
        deleted: f.deleted,
        invalid: f.invalid,
        no_permissions: f.no_permissions,
        symlink_target: f.symlink_target,
        block_size: f.block_size,
        sequence: f.sequence,
        blocks,
        version,
    }
}

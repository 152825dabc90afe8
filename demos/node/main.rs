//! Control surface (spec §6.4): a small CLI/daemon wiring every piece of
//! the crate together. `serve` runs the coordinator loop; the other
//! subcommands perform one mutation against the store and exit, the way an
//! operator's one-off `syncspirit cli ...` invocation would.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use syncspirit::config::{parse_device_id, Config};
use syncspirit::diff::{DiffKind, DiffNode};
use syncspirit::discovery::{DiscoveryBeacon, DiscoveryEvent};
use syncspirit::fileio::FileIoService;
use syncspirit::hasher::HasherPool;
use syncspirit::model::device::{Compression, ContactUri, Device};
use syncspirit::model::folder::Folder;
use syncspirit::model::folder_info::FolderInfo;
use syncspirit::model::{Cluster, DeviceId, FolderId};
use syncspirit::net::{dial, Acceptor, ConnectionRequest};
use syncspirit::peer::{spawn_peer, PeerEvent};
use syncspirit::scanner::{ScanBudget, Scanner, TickOutcome};
use syncspirit::scheduler::{ScanRequest, Scheduler};
use syncspirit::store::actor::DatabaseActor;
use syncspirit::store::Store;

#[derive(Parser)]
#[command(name = "syncspirit-node", version, about = "A peer-to-peer BEP sync node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: accept peers, dial configured ones, scan folders.
    Serve {
        #[arg(long)]
        config: PathBuf,
        /// Exit once this many seconds pass with no peer traffic.
        #[arg(long)]
        inactivity_timeout_secs: Option<u64>,
    },
    /// Add a known peer device.
    AddPeer {
        #[arg(long)]
        config: PathBuf,
        id: String,
        name: String,
        #[arg(long = "address")]
        addresses: Vec<String>,
    },
    /// Remove a known peer device.
    RemovePeer {
        #[arg(long)]
        config: PathBuf,
        id: String,
    },
    /// Share a configured folder with a known device.
    Share {
        #[arg(long)]
        config: PathBuf,
        folder: String,
        device: String,
    },
    /// Stop sharing a folder with a device.
    Unshare {
        #[arg(long)]
        config: PathBuf,
        folder: String,
        device: String,
    },
    /// Scan a folder to completion right now.
    Rescan {
        #[arg(long)]
        config: PathBuf,
        folder: String,
    },
    /// Print known devices, folders, and pending items.
    Status {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve { config, inactivity_timeout_secs } => run_daemon(config, inactivity_timeout_secs).await,
        Command::AddPeer { config, id, name, addresses } => add_peer(config, id, name, addresses).await,
        Command::RemovePeer { config, id } => remove_peer(config, id).await,
        Command::Share { config, folder, device } => share_folder(config, folder, device).await,
        Command::Unshare { config, folder, device } => unshare_folder(config, folder, device).await,
        Command::Rescan { config, folder } => rescan_folder(config, folder).await,
        Command::Status { config } => status(config).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Loads config, opens the store, and replays it into a fresh [`Cluster`]
/// via the startup diff tree (spec §4.3).
async fn load_cluster(config_path: &std::path::Path) -> Result<(Config, Arc<Store>, Cluster, DatabaseActor), String> {
    let config = Config::load(config_path).map_err(|e| e.to_string())?;
    let store = Arc::new(Store::open(&config.db_path).map_err(|e| e.to_string())?);
    let mut actor = DatabaseActor::new(store.clone());
    let mut cluster = Cluster::new(config.local_device, 256);

    if let Some(tree) = actor.load_tree().map_err(|e| e.to_string())? {
        tree.apply(&mut cluster, &mut actor).map_err(|e| e.to_string())?;
    }
    if let Some(repair) = actor.repair_corruption(&cluster) {
        repair.apply(&mut cluster, &mut actor).map_err(|e| e.to_string())?;
    }
    Ok((config, store, cluster, actor))
}

fn apply_one(cluster: &mut Cluster, actor: &mut DatabaseActor, kind: DiffKind) -> Result<(), String> {
    DiffNode::leaf(kind).apply(cluster, actor).map_err(|e| e.to_string())
}

fn hex(id: &DeviceId) -> String {
    id.0.iter().map(|b| format!("{b:02x}")).collect()
}

async fn add_peer(config_path: PathBuf, id: String, name: String, addresses: Vec<String>) -> Result<(), String> {
    let (_config, _store, mut cluster, mut actor) = load_cluster(&config_path).await?;
    let device_id = parse_device_id(&id).map_err(|e| e.to_string())?;
    let mut device = Device::new(device_id, name);
    device.addresses = addresses.into_iter().map(ContactUri).collect();
    apply_one(&mut cluster, &mut actor, DiffKind::UpsertDevice(device))?;
    println!("added peer {id}");
    Ok(())
}

async fn remove_peer(config_path: PathBuf, id: String) -> Result<(), String> {
    let (_config, _store, mut cluster, mut actor) = load_cluster(&config_path).await?;
    let device_id = parse_device_id(&id).map_err(|e| e.to_string())?;
    apply_one(&mut cluster, &mut actor, DiffKind::RemoveDevice(device_id))?;
    println!("removed peer {id}");
    Ok(())
}

async fn share_folder(config_path: PathBuf, folder: String, device: String) -> Result<(), String> {
    let (_config, _store, mut cluster, mut actor) = load_cluster(&config_path).await?;
    let folder_id = FolderId(folder.clone());
    let device_id = parse_device_id(&device).map_err(|e| e.to_string())?;

    if cluster.folder(&folder_id).is_none() {
        return Err(format!("folder {folder} is not configured"));
    }
    if device_id != cluster.local_device && cluster.device(&device_id).is_none() {
        return Err(format!("device {device} is not known; add-peer first"));
    }
    if cluster.folder_info_for(&folder_id, &device_id).is_some() {
        println!("folder {folder} is already shared with {device}");
        return Ok(());
    }

    let fi = FolderInfo::new(folder_id, device_id, 1);
    apply_one(&mut cluster, &mut actor, DiffKind::UpsertFolderInfo(fi))?;
    println!("shared {folder} with {device}");
    Ok(())
}

async fn unshare_folder(config_path: PathBuf, folder: String, device: String) -> Result<(), String> {
    let (_config, _store, mut cluster, mut actor) = load_cluster(&config_path).await?;
    let folder_id = FolderId(folder.clone());
    let device_id = parse_device_id(&device).map_err(|e| e.to_string())?;

    let fi_id = cluster
        .folder_info_for(&folder_id, &device_id)
        .map(|fi| fi.id)
        .ok_or_else(|| format!("folder {folder} is not shared with {device}"))?;
    apply_one(&mut cluster, &mut actor, DiffKind::RemoveFolderInfo(fi_id))?;
    println!("unshared {folder} from {device}");
    Ok(())
}

/// Scans one folder to completion, applying each resulting diff as it's
/// produced. Used both by the `rescan` subcommand and by the daemon's
/// scheduler loop.
async fn run_scan(cluster: &mut Cluster, actor: &mut DatabaseActor, folder_id: &FolderId) -> Result<(), String> {
    let folder = cluster.folder(folder_id).ok_or_else(|| format!("folder {} is not configured", folder_id.0))?;
    let root = folder.path.clone();
    let local_device = cluster.local_device;

    let (hasher, mut results, _workers) = HasherPool::spawn(4, 64);
    let mut scanner = Scanner::new(folder_id.clone(), local_device, root, hasher);
    let budget = ScanBudget::default();

    loop {
        match scanner.tick(cluster, budget).await {
            TickOutcome::Diff(diff) => diff.apply(cluster, actor).map_err(|e| e.to_string())?,
            TickOutcome::Done => break,
            TickOutcome::BudgetExhausted => {
                let Some(result) = results.recv().await else { break };
                if let Some(diff) = scanner.on_hash_result(result) {
                    diff.apply(cluster, actor).map_err(|e| e.to_string())?;
                }
            }
        }
    }
    apply_one(cluster, actor, DiffKind::ScanFinish { folder: folder_id.clone() })
}

async fn rescan_folder(config_path: PathBuf, folder: String) -> Result<(), String> {
    let (_config, _store, mut cluster, mut actor) = load_cluster(&config_path).await?;
    let folder_id = FolderId(folder.clone());
    run_scan(&mut cluster, &mut actor, &folder_id).await?;
    println!("rescanned {folder}");
    Ok(())
}

async fn status(config_path: PathBuf) -> Result<(), String> {
    let (_config, _store, cluster, _actor) = load_cluster(&config_path).await?;

    println!("local device: {}", hex(&cluster.local_device));
    println!("devices:");
    for d in cluster.devices() {
        println!("  {} {} state={:?}", hex(&d.id), d.name, d.state.connection);
    }
    println!("folders:");
    for f in cluster.folders() {
        println!("  {} {:?} path={}", f.id.0, f.label, f.path.display());
    }
    println!("pending devices:");
    for p in cluster.pending_devices() {
        println!("  {} seen at {}", hex(&p.id), p.last_seen.0);
    }
    println!("pending folders:");
    for p in cluster.pending_folders() {
        println!("  {} offered by {}", p.folder.0, hex(&p.offered_by));
    }
    Ok(())
}

fn parse_contact_ip(uri: &str) -> Option<IpAddr> {
    let without_scheme = uri.split("://").nth(1).unwrap_or(uri);
    without_scheme.rsplit_once(':').and_then(|(host, _)| host.trim_matches(['[', ']']).parse().ok())
}

fn parse_contact_addr(uri: &str) -> Option<SocketAddr> {
    let without_scheme = uri.split("://").nth(1).unwrap_or(uri);
    without_scheme.parse().ok()
}

/// Seeds devices/folders from the on-disk config into the cluster at
/// startup. Idempotent: running it against an already-seeded store is a
/// no-op for rows that already exist.
fn seed_from_config(config: &Config, cluster: &mut Cluster, actor: &mut DatabaseActor) -> Result<(), String> {
    for dc in &config.devices {
        let device_id = parse_device_id(&dc.id).map_err(|e| e.to_string())?;
        if cluster.device(&device_id).is_some() {
            continue;
        }
        let mut device = Device::new(device_id, dc.name.clone());
        device.addresses = dc.addresses.iter().cloned().map(ContactUri).collect();
        apply_one(cluster, actor, DiffKind::UpsertDevice(device))?;
    }

    for fc in &config.folders {
        let folder_id = FolderId(fc.id.clone());
        if cluster.folder(&folder_id).is_none() {
            apply_one(cluster, actor, DiffKind::UpsertFolder(Folder::new(folder_id.clone(), fc.label.clone(), fc.path.clone())))?;
        }
        if cluster.folder_info_for(&folder_id, &cluster.local_device).is_none() {
            let fi = FolderInfo::new(folder_id.clone(), cluster.local_device, 1);
            apply_one(cluster, actor, DiffKind::UpsertFolderInfo(fi))?;
        }
        for dev_hex in &fc.devices {
            let device_id = parse_device_id(dev_hex).map_err(|e| e.to_string())?;
            if cluster.folder_info_for(&folder_id, &device_id).is_none() {
                let fi = FolderInfo::new(folder_id.clone(), device_id, 1);
                apply_one(cluster, actor, DiffKind::UpsertFolderInfo(fi))?;
            }
        }
    }
    Ok(())
}

fn spawn_event_forwarder(device: DeviceId, mut rx: tokio::sync::mpsc::Receiver<PeerEvent>, tx: tokio::sync::mpsc::Sender<(DeviceId, PeerEvent)>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if tx.send((device, event)).await.is_err() {
                break;
            }
        }
    });
}

/// The coordinator (spec §5): one task owning the `Cluster`, handling
/// accepted/dialed connections, peer events, and scan scheduling over a
/// single `tokio::select!` loop so diff application is never contended.
async fn run_daemon(config_path: PathBuf, inactivity_timeout_secs: Option<u64>) -> Result<(), String> {
    let (config, _store, mut cluster, mut actor) = load_cluster(&config_path).await?;
    seed_from_config(&config, &mut cluster, &mut actor)?;

    let (fileio, _fileio_worker) = FileIoService::spawn(64, false);

    let (conn_tx, mut conn_rx) = tokio::sync::mpsc::channel::<ConnectionRequest>(16);
    let acceptor = Acceptor::bind(config.listen_addr, conn_tx.clone()).await.map_err(|e| e.to_string())?;
    let _acceptor_handle = acceptor.spawn();

    // Known devices' addresses, for matching an inbound connection's IP to a
    // device identity and for dialing out (BEP has no certificate layer
    // here, spec §1 Non-goals, so identity is established purely out of
    // band from configured addresses).
    let mut address_to_device: HashMap<IpAddr, DeviceId> = HashMap::new();
    for d in cluster.devices() {
        for addr in &d.addresses {
            if let Some(ip) = parse_contact_ip(&addr.0) {
                address_to_device.insert(ip, d.id);
            }
        }
    }
    for d in cluster.devices() {
        for addr in &d.addresses {
            if let Some(sock_addr) = parse_contact_addr(&addr.0) {
                match dial(sock_addr).await {
                    Ok(req) => {
                        let _ = conn_tx.send(req).await;
                    }
                    Err(err) => tracing::warn!(device = %hex(&d.id), error = %err, "failed to dial configured peer"),
                }
                break;
            }
        }
    }

    let mut scheduler = Scheduler::new();
    for folder in cluster.folders() {
        scheduler.arm(folder.id.clone(), Duration::from_secs(folder.rescan_interval_s as u64));
        scheduler.request(ScanRequest { folder: folder.id.clone(), sub_dir: None });
    }

    let (peer_event_tx, mut peer_event_rx) = tokio::sync::mpsc::channel::<(DeviceId, PeerEvent)>(64);
    let mut peer_handles = HashMap::new();
    let mut last_activity = Instant::now();
    let inactivity_timeout = inactivity_timeout_secs.map(Duration::from_secs);

    loop {
        let next_deadline = scheduler.next_deadline(Instant::now()).unwrap_or(Duration::from_secs(3600));
        let idle_check = inactivity_timeout.map(|t| t.saturating_sub(last_activity.elapsed())).unwrap_or(Duration::from_secs(3600));

        tokio::select! {
            conn = conn_rx.recv() => {
                let Some(conn) = conn else { break };
                last_activity = Instant::now();
                let Some(&device_id) = address_to_device.get(&conn.peer_addr.ip()) else {
                    tracing::warn!(peer_addr = %conn.peer_addr, "dropping connection from unrecognised address");
                    continue;
                };
                let (read_half, write_half) = conn.stream.into_split();
                let (handle, event_rx, _read_jh, _ctrl_jh) = spawn_peer(
                    device_id,
                    read_half,
                    write_half,
                    fileio.clone(),
                    hex(&cluster.local_device),
                    "syncspirit".into(),
                    env!("CARGO_PKG_VERSION").into(),
                );
                spawn_event_forwarder(device_id, event_rx, peer_event_tx.clone());
                peer_handles.insert(device_id, handle);
            }

            Some((device_id, event)) = peer_event_rx.recv() => {
                last_activity = Instant::now();
                match event {
                    PeerEvent::Diff(diff) => {
                        if let Err(err) = diff.apply(&mut cluster, &mut actor) {
                            tracing::error!(device = %hex(&device_id), error = %err, "failed to apply peer diff");
                        }
                    }
                    PeerEvent::Closed { reason } => {
                        tracing::info!(device = %hex(&device_id), ?reason, "peer connection closed");
                        peer_handles.remove(&device_id);
                        if let Some(dev) = cluster.device(&device_id) {
                            let next = dev.state.next_epoch();
                            let _ = apply_one(&mut cluster, &mut actor, DiffKind::PeerState { device: device_id, state: next });
                        }
                    }
                }
            }

            _ = tokio::time::sleep(next_deadline) => {
                for folder_id in scheduler.due_folders(Instant::now()) {
                    scheduler.request(ScanRequest { folder: folder_id, sub_dir: None });
                }
                if let Some(req) = scheduler.next_request(&cluster) {
                    let interval = cluster.folder(&req.folder).map(|f| f.rescan_interval_s).unwrap_or(3600);
                    if let Some(folder) = cluster.folder(&req.folder) {
                        folder.begin_sync();
                    }
                    let result = run_scan(&mut cluster, &mut actor, &req.folder).await;
                    if let Some(folder) = cluster.folder(&req.folder) {
                        folder.end_sync();
                    }
                    if let Err(err) = result {
                        tracing::warn!(folder = %req.folder.0, error = %err, "scan failed");
                    }
                    scheduler.on_scan_finish(req.folder, Duration::from_secs(interval as u64));
                }
            }

            _ = tokio::time::sleep(idle_check), if inactivity_timeout.is_some() => {
                if last_activity.elapsed() >= inactivity_timeout.unwrap() {
                    tracing::info!("exiting after inactivity timeout");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Spawns the optional local-discovery beacon (spec §6.2), turning incoming
/// announcements into pending-device diffs. Not started by default since it
/// needs a broadcast address the config doesn't currently carry; kept as a
/// free function other binaries embedding this crate can call once they
/// have one.
#[allow(dead_code)]
async fn spawn_discovery(
    listen_addr: SocketAddr,
    broadcast_addr: SocketAddr,
    self_id: DeviceId,
    addresses: Vec<String>,
) -> Result<tokio::sync::mpsc::Receiver<DiscoveryEvent>, String> {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let beacon = DiscoveryBeacon::bind(listen_addr, broadcast_addr, self_id, 1, addresses, Duration::from_secs(30), tx)
        .await
        .map_err(|e| e.to_string())?;
    beacon.spawn();
    Ok(rx)
}

#[allow(dead_code)]
fn default_compression() -> Compression {
    Compression::default()
}

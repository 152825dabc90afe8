//! Local discovery beacon (spec §6.2): a UDP broadcast announcing this
//! device's id and addresses, and a receiver that turns other devices'
//! announcements into pending/ignored/known-device diffs. Same framed,
//! big-endian wire style as [`crate::bep::frame`], scaled down to one
//! packet instead of a stream.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::diff::DiffKind;
use crate::model::device::DeviceId;
use crate::model::pending::PendingDevice;

pub const DISCOVERY_MAGIC: u32 = 0x2EA7D90C;
const MAX_PACKET: usize = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("bad discovery magic: {0:#x}")]
    BadMagic(u32),
    #[error("malformed announce packet: {0}")]
    Malformed(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<io::Error> for DiscoveryError {
    fn from(err: io::Error) -> Self {
        DiscoveryError::Io(err.to_string())
    }
}

/// One device's announcement (spec §6.2 Announce payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub id: DeviceId,
    pub addresses: Vec<String>,
    pub instance_id: u64,
}

pub fn encode(announce: &Announce) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.extend_from_slice(&announce.id.0);
    body.write_u32::<BigEndian>(announce.addresses.len() as u32).unwrap();
    for addr in &announce.addresses {
        let bytes = addr.as_bytes();
        body.write_u32::<BigEndian>(bytes.len() as u32).unwrap();
        body.extend_from_slice(bytes);
    }
    body.write_u64::<BigEndian>(announce.instance_id).unwrap();

    let mut packet = Vec::with_capacity(body.len() + 4);
    packet.write_u32::<BigEndian>(DISCOVERY_MAGIC).unwrap();
    packet.extend_from_slice(&body);
    packet
}

pub fn decode(packet: &[u8]) -> Result<Announce, DiscoveryError> {
    let mut cursor = packet;
    let magic = cursor.read_u32::<BigEndian>().map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    if magic != DISCOVERY_MAGIC {
        return Err(DiscoveryError::BadMagic(magic));
    }
    let mut id = [0u8; 32];
    cursor.read_exact(&mut id).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

    let count = cursor.read_u32::<BigEndian>().map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    let mut addresses = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = cursor.read_u32::<BigEndian>().map_err(|e| DiscoveryError::Malformed(e.to_string()))? as usize;
        if len > cursor.len() {
            return Err(DiscoveryError::Malformed("address length overruns packet".into()));
        }
        let (raw, rest) = cursor.split_at(len);
        let addr = String::from_utf8(raw.to_vec()).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        addresses.push(addr);
        cursor = rest;
    }
    let instance_id = cursor.read_u64::<BigEndian>().map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

    Ok(Announce { id: DeviceId(id), addresses, instance_id })
}

/// What a received announcement maps to, for the coordinator to turn into a
/// diff (spec §6.2: known device → `update_contact`; ignored → dropped;
/// unknown → pending). The beacon itself never decides policy beyond
/// "is this device already known/ignored" — that classification is the
/// coordinator's job since only it holds the cluster.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Announce { from: SocketAddr, announce: Announce },
}

/// Runs the send/receive loop for one UDP socket: broadcasts our own
/// announcement every `frequency`, forwards every other announcement seen
/// (minus our own id) to the coordinator.
pub struct DiscoveryBeacon {
    socket: UdpSocket,
    self_id: DeviceId,
    instance_id: u64,
    addresses: Vec<String>,
    broadcast_addr: SocketAddr,
    frequency: Duration,
    event_tx: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryBeacon {
    pub async fn bind(
        listen_addr: SocketAddr,
        broadcast_addr: SocketAddr,
        self_id: DeviceId,
        instance_id: u64,
        addresses: Vec<String>,
        frequency: Duration,
        event_tx: mpsc::Sender<DiscoveryEvent>,
    ) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(listen_addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, self_id, instance_id, addresses, broadcast_addr, frequency, event_tx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.frequency);
        let mut buf = vec![0u8; MAX_PACKET];
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let announce = Announce {
                        id: self.self_id,
                        addresses: self.addresses.clone(),
                        instance_id: self.instance_id,
                    };
                    let packet = encode(&announce);
                    if let Err(err) = self.socket.send_to(&packet, self.broadcast_addr).await {
                        tracing::warn!(error = %err, "discovery beacon send failed");
                    }
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, from)) => self.handle_packet(&buf[..len], from).await,
                        Err(err) => tracing::warn!(error = %err, "discovery beacon recv failed"),
                    }
                }
            }
        }
    }

    async fn handle_packet(&self, packet: &[u8], from: SocketAddr) {
        let announce = match decode(packet) {
            Ok(a) => a,
            Err(err) => {
                tracing::debug!(error = %err, %from, "dropping malformed discovery packet");
                return;
            }
        };
        if announce.id == self.self_id {
            return;
        }
        let _ = self.event_tx.send(DiscoveryEvent::Announce { from, announce }).await;
    }
}

/// Turns a received announcement into the diff the coordinator should
/// apply, given whether the device is already known or explicitly ignored
/// (spec §6.2). Kept as a free function so the coordinator can call it
/// without owning a `DiscoveryBeacon`.
pub fn classify(
    announce: &Announce,
    known: bool,
    ignored: bool,
    last_seen: String,
) -> Option<DiffKind> {
    if ignored {
        return None;
    }
    if known {
        return None;
    }
    Some(DiffKind::AddPendingDevice(PendingDevice {
        id: announce.id,
        last_seen: crate::model::device::ContactUri(last_seen),
        name: String::new(),
    }))
}

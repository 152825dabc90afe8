//! Peer connections (spec §4.4): one [`read_task::PeerReadTask`] plus one
//! [`controller::PeerController`] per connected device, wired together over
//! a pair of channels the same way the teacher pairs its read task with its
//! write-half-owning task.

pub mod controller;
pub mod read_task;
pub mod request_ring;

pub use controller::{ControllerState, FetchBlock, PeerCommand, PeerController, PeerEvent, PeerHandle};
pub use read_task::{PeerReadTask, ReadEvent};
pub use request_ring::{PendingBlock, RequestRing};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::fileio::FileIoHandle;
use crate::model::device::DeviceId;

const READ_EVENT_CHANNEL: usize = 64;
const PEER_EVENT_CHANNEL: usize = 64;

/// Splits a connected stream into its read/write halves and spawns the read
/// task and controller for it, returning the handle the coordinator uses to
/// drive the peer plus the event stream it drives back.
#[allow(clippy::too_many_arguments)]
pub fn spawn_peer<R, W>(
    device: DeviceId,
    read_half: R,
    write_half: W,
    fileio: FileIoHandle,
    device_name: String,
    client_name: String,
    client_version: String,
) -> (PeerHandle, mpsc::Receiver<PeerEvent>, JoinHandle<()>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (read_tx, read_rx) = mpsc::channel(READ_EVENT_CHANNEL);
    let (event_tx, event_rx) = mpsc::channel(PEER_EVENT_CHANNEL);

    let read_handle = PeerReadTask::spawn(read_half, read_tx);
    let (handle, controller_handle) = PeerController::spawn(
        device,
        write_half,
        read_rx,
        fileio,
        device_name,
        client_name,
        client_version,
        event_tx,
    );

    (handle, event_rx, read_handle, controller_handle)
}

//! Acceptor / dialer (spec §2): accepts inbound TCP connections and
//! initiates outbound ones, handing each live stream off as a
//! [`ConnectionRequest`] event rather than owning peer state itself —
//! the coordinator decides whether to spawn a [`crate::peer`] controller
//! for it. Mirrors the teacher's `handle_forever`/`process_socket` split
//! between "accept a socket" and "what to do with one".

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: std::io::Error },
}

/// One live, unauthenticated TCP stream ready for a BEP Hello exchange, plus
/// where it came from (spec §2 "emits a connection-request diff").
pub struct ConnectionRequest {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub outbound: bool,
}

/// Accepts inbound connections on `listen_addr` until the receiver side of
/// `tx` is dropped, forwarding each one as a [`ConnectionRequest`].
pub struct Acceptor {
    listener: TcpListener,
    tx: mpsc::Sender<ConnectionRequest>,
}

impl Acceptor {
    pub async fn bind(listen_addr: SocketAddr, tx: mpsc::Sender<ConnectionRequest>) -> Result<Self, NetError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| NetError::Bind { addr: listen_addr, source })?;
        Ok(Self { listener, tx })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::warn!(%peer_addr, error = %err, "failed to set TCP_NODELAY");
                    }
                    let req = ConnectionRequest { stream, peer_addr, outbound: false };
                    if self.tx.send(req).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                }
            }
        }
    }
}

/// Dials a single outbound address. Stateless: the coordinator calls this
/// per address it wants to reach (a known device's contact URIs), rather
/// than the dialer owning a retry loop — retry/backoff policy belongs to
/// whatever drives reconnection attempts (out of scope, spec §1).
pub async fn dial(addr: SocketAddr) -> Result<ConnectionRequest, NetError> {
    let stream = TcpStream::connect(addr).await.map_err(|source| NetError::Connect { addr, source })?;
    stream.set_nodelay(true).ok();
    Ok(ConnectionRequest { stream, peer_addr: addr, outbound: true })
}

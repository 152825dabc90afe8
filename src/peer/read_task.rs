//! Reads BEP frames off a peer's read half, decompresses and parses them,
//! and forwards the result to the controller. Split out from the
//! controller the same way the teacher splits `ReadTask` from `VfsTask`.
//!
//! The first frame on a connection is the bare-magic Hello (spec §6.1),
//! read with [`frame::read_hello`]; every frame after that goes through
//! the ordinary tagged [`frame::read_frame`] envelope.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bep::message::Message;
use crate::bep::{compression, frame, parser, BepError};

pub enum ReadEvent {
    Message(Message),
    Error(BepError),
    Eof,
}

pub struct PeerReadTask<R> {
    read_half: R,
    event_tx: mpsc::Sender<ReadEvent>,
}

impl<R: AsyncRead + Unpin + Send + 'static> PeerReadTask<R> {
    pub fn spawn(read_half: R, event_tx: mpsc::Sender<ReadEvent>) -> JoinHandle<()> {
        tokio::spawn(Self { read_half, event_tx }.run())
    }

    async fn run(mut self) {
        match frame::read_hello(&mut self.read_half).await {
            Ok(body) => match parser::message(0, &body) {
                Ok(msg) => {
                    if self.event_tx.send(ReadEvent::Message(msg)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = self.event_tx.send(ReadEvent::Error(err)).await;
                    return;
                }
            },
            Err(BepError::UnexpectedEof) => {
                let _ = self.event_tx.send(ReadEvent::Eof).await;
                return;
            }
            Err(err) => {
                let _ = self.event_tx.send(ReadEvent::Error(err)).await;
                return;
            }
        }

        loop {
            let (tag, compressed, payload) = match frame::read_frame(&mut self.read_half).await {
                Ok(v) => v,
                Err(BepError::UnexpectedEof) => {
                    let _ = self.event_tx.send(ReadEvent::Eof).await;
                    return;
                }
                Err(err) => {
                    let _ = self.event_tx.send(ReadEvent::Error(err)).await;
                    return;
                }
            };
            let body = if compressed {
                match compression::decompress(&payload) {
                    Ok(d) => d,
                    Err(err) => {
                        let _ = self.event_tx.send(ReadEvent::Error(err)).await;
                        return;
                    }
                }
            } else {
                payload
            };
            match parser::message(tag, &body) {
                Ok(msg) => {
                    if self.event_tx.send(ReadEvent::Message(msg)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = self.event_tx.send(ReadEvent::Error(err)).await;
                    return;
                }
            }
        }
    }
}

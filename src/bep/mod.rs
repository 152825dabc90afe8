//! BEP wire framing (spec §6.1): message parsing/serialization and the
//! length-prefixed frame layout peer controllers speak over a TCP stream.

pub mod compression;
pub mod frame;
pub mod message;
pub mod parser;
pub mod serializer;

use thiserror::Error;

pub use message::{
    ClusterConfigFolder, ClusterConfigFolderDevice, Message, ResponseCode, WireBlock, WireFileInfo,
    WireVersionEntry,
};

/// Magic bytes opening every new connection's first frame (spec §6.1).
pub const HELLO_MAGIC: u32 = 0x2EA7_D90B;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BepError {
    #[error("frame exceeds the maximum allowed size ({0} bytes)")]
    FrameTooLarge(u32),
    #[error("connection closed while reading a frame")]
    UnexpectedEof,
    #[error("hello magic mismatch: got {0:#x}")]
    BadMagic(u32),
    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),
    #[error("malformed message body: {0}")]
    Malformed(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BepError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            BepError::UnexpectedEof
        } else {
            BepError::Io(err.to_string())
        }
    }
}

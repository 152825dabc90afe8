//! Frame layout (spec §6.1): 4-byte header length, header bytes (message
//! tag + compression flag), 4-byte payload length, payload bytes. The
//! first frame on a new connection is instead a bare Hello: magic, 2-byte
//! length, Hello payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{BepError, HELLO_MAGIC};

/// Frames larger than this are rejected outright rather than buffered
/// (spec §5 resource bounds).
pub const MAX_FRAME_SIZE: u32 = 64 << 20;

pub async fn write_hello(stream: &mut (impl AsyncWrite + Unpin), body: &[u8]) -> Result<(), BepError> {
    if body.len() > u16::MAX as usize {
        return Err(BepError::FrameTooLarge(body.len() as u32));
    }
    stream.write_u32(HELLO_MAGIC).await?;
    stream.write_u16(body.len() as u16).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_hello(stream: &mut (impl AsyncRead + Unpin)) -> Result<Vec<u8>, BepError> {
    let magic = stream.read_u32().await?;
    if magic != HELLO_MAGIC {
        return Err(BepError::BadMagic(magic));
    }
    let len = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes one framed message. `compressed` records whether `payload` is
/// already LZ4-compressed (callers compress before calling this).
pub async fn write_frame(
    stream: &mut (impl AsyncWrite + Unpin),
    tag: u8,
    compressed: bool,
    payload: &[u8],
) -> Result<(), BepError> {
    if payload.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(BepError::FrameTooLarge(payload.len() as u32));
    }
    let header = [tag, compressed as u8];
    stream.write_u32(header.len() as u32).await?;
    stream.write_all(&header).await?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Returns (tag, compressed, raw-payload-bytes); the caller decompresses
/// if `compressed` is set before parsing with [`super::parser::message`].
pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> Result<(u8, bool, Vec<u8>), BepError> {
    let header_len = stream.read_u32().await? as usize;
    if header_len < 2 || header_len as u32 > MAX_FRAME_SIZE {
        return Err(BepError::Malformed(format!("implausible header length {header_len}")));
    }
    let mut header = vec![0u8; header_len];
    stream.read_exact(&mut header).await?;
    let tag = header[0];
    let compressed = header[1] != 0;

    let payload_len = stream.read_u32().await?;
    if payload_len > MAX_FRAME_SIZE {
        return Err(BepError::FrameTooLarge(payload_len));
    }
    let mut payload = vec![0u8; payload_len as usize];
    stream.read_exact(&mut payload).await?;
    Ok((tag, compressed, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hello_round_trips_over_an_in_memory_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let body = b"hello-payload".to_vec();
        let body2 = body.clone();
        let writer = tokio::spawn(async move { write_hello(&mut client, &body2).await });
        let read = read_hello(&mut server).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(read, body);
    }

    #[tokio::test]
    async fn frame_round_trips() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = b"a BEP message body".to_vec();
        let payload2 = payload.clone();
        let writer = tokio::spawn(async move { write_frame(&mut client, 7, false, &payload2).await });
        let (tag, compressed, read_payload) = read_frame(&mut server).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(tag, 7);
        assert!(!compressed);
        assert_eq!(read_payload, payload);
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(16);
        tokio::spawn(async move {
            client.write_u32(0xdead_beef).await.unwrap();
            client.write_u16(0).await.unwrap();
        });
        assert_eq!(read_hello(&mut server).await, Err(BepError::BadMagic(0xdead_beef)));
    }
}

//! LZ4 framing for Index/IndexUpdate payloads (spec §6.1).

use std::io::{Read, Write};

use super::BepError;

/// Payloads at or above this size are compressed when the peer's
/// preference allows it (spec §6.1).
pub const COMPRESSION_THRESHOLD: usize = 128;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, BepError> {
    let mut encoder = lz4::EncoderBuilder::new()
        .build(Vec::new())
        .map_err(|e| BepError::Compression(e.to_string()))?;
    encoder.write_all(data).map_err(|e| BepError::Compression(e.to_string()))?;
    let (writer, result) = encoder.finish();
    result.map_err(|e| BepError::Compression(e.to_string()))?;
    Ok(writer)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, BepError> {
    let mut decoder = lz4::Decoder::new(data).map_err(|e| BepError::Compression(e.to_string()))?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| BepError::Compression(e.to_string()))?;
    Ok(out)
}

/// Whether `compression_pref` (spec §6.1: `never`/`metadata`/`always`)
/// should compress a payload of `len` bytes on a message of this kind.
pub fn should_compress(compression_pref: crate::model::device::Compression, len: usize, is_index_like: bool) -> bool {
    use crate::model::device::Compression;
    match compression_pref {
        Compression::Never => false,
        Compression::Always => len >= COMPRESSION_THRESHOLD,
        Compression::Metadata => is_index_like && len >= COMPRESSION_THRESHOLD,
    }
}

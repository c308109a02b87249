//! Value codec - MessagePack serialization with optional LZ4 compression
//!
//! The codec sits on top of raw byte values: writers serialize (and
//! optionally compress) structured values before a `set`, readers reverse
//! the passes after a `get`. The compress/decompress flags are per call, not
//! client state - a mismatched read fails with a [`CodecError`] instead of
//! producing a corrupted value.

use crate::error::CodecError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use tracing::debug;

/// Serialize a value to bytes, optionally compressing the result
pub fn encode<T: Serialize>(value: &T, compress: bool) -> Result<Vec<u8>, CodecError> {
    let packed = rmp_serde::to_vec(value)?;
    if !compress {
        return Ok(packed);
    }

    let mut encoder = lz4::EncoderBuilder::new()
        .level(4)
        .build(Vec::new())
        .map_err(CodecError::Compress)?;
    encoder.write_all(&packed).map_err(CodecError::Compress)?;
    let (compressed, result) = encoder.finish();
    result.map_err(CodecError::Compress)?;

    debug!(
        "packed value compressed: {} -> {} bytes",
        packed.len(),
        compressed.len()
    );
    Ok(compressed)
}

/// Decode bytes back into a value, optionally decompressing first.
///
/// The `decompress` flag must match the `compress` flag used on the write
/// side; a mismatch or corrupted input fails with a [`CodecError`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8], decompress: bool) -> Result<T, CodecError> {
    if !decompress {
        return Ok(rmp_serde::from_slice(bytes)?);
    }

    let mut decoder = lz4::Decoder::new(bytes).map_err(CodecError::Decompress)?;
    let mut packed = Vec::new();
    decoder
        .read_to_end(&mut packed)
        .map_err(CodecError::Decompress)?;

    debug!(
        "packed value decompressed: {} -> {} bytes",
        bytes.len(),
        packed.len()
    );
    Ok(rmp_serde::from_slice(&packed)?)
}

//! Zlib packet compression for Java-edition frames.
//!
//! Once compression is negotiated every frame body is
//! `VarInt(uncompressed length) + data`, where a length of 0 marks a body
//! sent uncompressed because it was below the threshold.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::codec::{read_length, ProtoEncode};
use crate::error::ProtoError;
use crate::types::VarInt;

/// Largest uncompressed body accepted from a peer.
pub const MAX_UNCOMPRESSED_LENGTH: usize = 8 * 1024 * 1024;

/// Compress a frame body with the given threshold.
pub fn compress_packet(data: &[u8], threshold: usize) -> Result<Bytes, ProtoError> {
    let mut out = BytesMut::with_capacity(data.len() + VarInt::MAX_BYTES);
    if data.len() < threshold {
        VarInt(0).proto_encode(&mut out);
        out.put_slice(data);
        return Ok(out.freeze());
    }

    VarInt(data.len() as i32).proto_encode(&mut out);
    let mut encoder = ZlibEncoder::new(out.writer(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ProtoError::CompressError(e.to_string()))?;
    let out = encoder
        .finish()
        .map_err(|e| ProtoError::CompressError(e.to_string()))?
        .into_inner();
    Ok(out.freeze())
}

/// Decompress a frame body produced by [`compress_packet`].
pub fn decompress_packet(mut frame: Bytes, threshold: usize) -> Result<Bytes, ProtoError> {
    let data_len = read_length(&mut frame)?;
    if data_len == 0 {
        return Ok(frame);
    }
    if data_len < threshold {
        return Err(ProtoError::BadlyCompressed {
            claimed: data_len,
            threshold,
        });
    }
    if data_len > MAX_UNCOMPRESSED_LENGTH {
        return Err(ProtoError::DecompressError(format!(
            "declared length {data_len} exceeds {MAX_UNCOMPRESSED_LENGTH}"
        )));
    }

    let mut output = Vec::with_capacity(data_len);
    ZlibDecoder::new(frame.reader())
        .take(data_len as u64 + 1)
        .read_to_end(&mut output)
        .map_err(|e| ProtoError::DecompressError(e.to_string()))?;
    if output.len() != data_len {
        return Err(ProtoError::DecompressError(format!(
            "declared length {data_len}, inflated {}",
            output.len()
        )));
    }
    Ok(Bytes::from(output))
}

//! Protocol encoding/decoding traits and helpers.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtoError;
use crate::types::VarInt;

/// Default character limit for protocol strings.
pub const MAX_STRING_CHARS: usize = 32767;

/// Encode a value onto a buffer.
pub trait ProtoEncode {
    fn proto_encode(&self, buf: &mut impl BufMut);
}

/// Decode a value from a buffer.
pub trait ProtoDecode: Sized {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError>;
}

/// Fail with `BufferTooShort` unless `needed` bytes remain.
pub fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), ProtoError> {
    if buf.remaining() < needed {
        return Err(ProtoError::BufferTooShort {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

/// Read a VarInt length prefix, rejecting negative values.
pub fn read_length(buf: &mut impl Buf) -> Result<usize, ProtoError> {
    let len = VarInt::proto_decode(buf)?.0;
    if len < 0 {
        return Err(ProtoError::NegativeLength(len));
    }
    Ok(len as usize)
}

/// Write a protocol string (VarInt byte length + UTF-8).
pub fn write_string(buf: &mut impl BufMut, s: &str) {
    VarInt(s.len() as i32).proto_encode(buf);
    buf.put_slice(s.as_bytes());
}

/// Read a protocol string with the default character limit.
pub fn read_string(buf: &mut impl Buf) -> Result<String, ProtoError> {
    read_string_bounded(buf, MAX_STRING_CHARS)
}

/// Read a protocol string (VarInt byte length + UTF-8) of at most `max_chars` characters.
pub fn read_string_bounded(buf: &mut impl Buf, max_chars: usize) -> Result<String, ProtoError> {
    let len = read_length(buf)?;
    // A char is at most 3 bytes in the modified UTF-8 the protocol is sized for.
    let max_bytes = max_chars.saturating_mul(3);
    if len > max_bytes {
        return Err(ProtoError::StringTooLong {
            len,
            max: max_bytes,
        });
    }
    ensure_remaining(buf, len)?;
    let data = buf.copy_to_bytes(len);
    let s = String::from_utf8(data.to_vec()).map_err(|_| ProtoError::InvalidUtf8)?;
    let chars = s.chars().count();
    if chars > max_chars {
        return Err(ProtoError::StringTooLong {
            len: chars,
            max: max_chars,
        });
    }
    Ok(s)
}

/// Write a VarInt-length-prefixed byte array.
pub fn write_byte_array(buf: &mut impl BufMut, data: &[u8]) {
    VarInt(data.len() as i32).proto_encode(buf);
    buf.put_slice(data);
}

/// Read a VarInt-length-prefixed byte array.
pub fn read_byte_array(buf: &mut impl Buf) -> Result<Bytes, ProtoError> {
    let len = read_length(buf)?;
    ensure_remaining(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

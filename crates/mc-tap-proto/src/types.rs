//! Base data types of the Java-edition wire format.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{ProtoDecode, ProtoEncode};
use crate::error::ProtoError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VarIntError {
    #[error("buffer too short")]
    BufferTooShort,
    #[error("VarInt is too long (more than {max_bytes} bytes)")]
    TooManyBytes { max_bytes: usize },
}

// ---------------------------------------------------------------------------
// VarInt (i32, two's complement LEB128, no ZigZag)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarInt(pub i32);

impl VarInt {
    /// Maximum bytes a VarInt can occupy.
    pub const MAX_BYTES: usize = 5;

    /// Number of bytes `value` occupies on the wire.
    pub fn written_size(value: i32) -> usize {
        let mut value = value as u32;
        let mut size = 1;
        while value & !0x7F != 0 {
            value >>= 7;
            size += 1;
        }
        size
    }

    /// Encode into the provided buffer and return the number of bytes written.
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let mut value = self.0 as u32;
        let mut written = 0;
        loop {
            written += 1;
            if value & !0x7F == 0 {
                buf.push(value as u8);
                return written;
            }
            buf.push((value & 0x7F | 0x80) as u8);
            value >>= 7;
        }
    }

    /// Decode from a byte slice. Returns the value and the number of bytes consumed.
    ///
    /// `BufferTooShort` means the slice ends inside the VarInt, which frame
    /// readers use to wait for more data.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), VarIntError> {
        let mut result: u32 = 0;
        for (i, &byte) in buf.iter().enumerate() {
            if i >= Self::MAX_BYTES {
                return Err(VarIntError::TooManyBytes {
                    max_bytes: Self::MAX_BYTES,
                });
            }
            result |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok((VarInt(result as i32), i + 1));
            }
        }
        Err(VarIntError::BufferTooShort)
    }
}

impl ProtoEncode for VarInt {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        let mut value = self.0 as u32;
        loop {
            if value & !0x7F == 0 {
                buf.put_u8(value as u8);
                return;
            }
            buf.put_u8((value & 0x7F | 0x80) as u8);
            value >>= 7;
        }
    }
}

impl ProtoDecode for VarInt {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        let mut result: u32 = 0;
        for i in 0..Self::MAX_BYTES {
            if !buf.has_remaining() {
                return Err(VarIntError::BufferTooShort.into());
            }
            let byte = buf.get_u8();
            result |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(VarInt(result as i32));
            }
        }
        Err(VarIntError::TooManyBytes {
            max_bytes: Self::MAX_BYTES,
        }
        .into())
    }
}

impl From<i32> for VarInt {
    fn from(v: i32) -> Self {
        VarInt(v)
    }
}

impl From<VarInt> for i32 {
    fn from(v: VarInt) -> Self {
        v.0
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarInt({})", self.0)
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// VarLong (i64, two's complement LEB128, no ZigZag)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarLong(pub i64);

impl VarLong {
    /// Maximum bytes a VarLong can occupy.
    pub const MAX_BYTES: usize = 10;
}

impl ProtoEncode for VarLong {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        let mut value = self.0 as u64;
        loop {
            if value & !0x7F == 0 {
                buf.put_u8(value as u8);
                return;
            }
            buf.put_u8((value & 0x7F | 0x80) as u8);
            value >>= 7;
        }
    }
}

impl ProtoDecode for VarLong {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        let mut result: u64 = 0;
        for i in 0..Self::MAX_BYTES {
            if !buf.has_remaining() {
                return Err(VarIntError::BufferTooShort.into());
            }
            let byte = buf.get_u8();
            result |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(VarLong(result as i64));
            }
        }
        Err(VarIntError::TooManyBytes {
            max_bytes: Self::MAX_BYTES,
        }
        .into())
    }
}

impl From<i64> for VarLong {
    fn from(v: i64) -> Self {
        VarLong(v)
    }
}

impl fmt::Debug for VarLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarLong({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn varint_known_encodings() {
        // Reference values from the Java-edition wire documentation.
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (255, &[0xFF, 0x01]),
            (25565, &[0xDD, 0xC7, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (i32::MAX, &[0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
            (i32::MIN, &[0x80, 0x80, 0x80, 0x80, 0x08]),
        ];
        for &(value, expected) in cases {
            let mut buf = BytesMut::new();
            VarInt(value).proto_encode(&mut buf);
            assert_eq!(&buf[..], expected, "encoding {value}");
            assert_eq!(VarInt::written_size(value), expected.len());

            let decoded = VarInt::proto_decode(&mut buf.freeze()).unwrap();
            assert_eq!(decoded.0, value);
        }
    }

    #[test]
    fn varint_slice_decode_reports_consumed() {
        let (v, used) = VarInt::decode(&[0xDD, 0xC7, 0x01, 0xAA]).unwrap();
        assert_eq!(v.0, 25565);
        assert_eq!(used, 3);
    }

    #[test]
    fn varint_slice_decode_incomplete() {
        assert!(matches!(
            VarInt::decode(&[0x80, 0x80]),
            Err(VarIntError::BufferTooShort)
        ));
    }

    #[test]
    fn varint_too_long() {
        let data = bytes::Bytes::from_static(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(VarInt::proto_decode(&mut data.clone()).is_err());
        assert!(matches!(
            VarInt::decode(&data),
            Err(VarIntError::TooManyBytes { .. })
        ));
    }

    #[test]
    fn varint_vec_encode_matches_buf_encode() {
        let mut vec = Vec::new();
        let written = VarInt(300).encode(&mut vec);
        let mut buf = BytesMut::new();
        VarInt(300).proto_encode(&mut buf);
        assert_eq!(written, 2);
        assert_eq!(&vec[..], &buf[..]);
    }

    #[test]
    fn varlong_negative_uses_ten_bytes() {
        let mut buf = BytesMut::new();
        VarLong(-1).proto_encode(&mut buf);
        assert_eq!(buf.len(), 10);
        let decoded = VarLong::proto_decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.0, -1);
    }
}
